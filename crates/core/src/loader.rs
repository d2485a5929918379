use crate::extractor::{extract_page_texts, read_text_file};
use crate::models::{Document, DocumentKind};
use crate::IngestError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub fn document_kind(path: &Path) -> Option<DocumentKind> {
    let extension = path.extension().and_then(|ext| ext.to_str())?;
    if extension.eq_ignore_ascii_case("pdf") {
        Some(DocumentKind::Pdf)
    } else if extension.eq_ignore_ascii_case("txt") {
        Some(DocumentKind::Text)
    } else {
        None
    }
}

/// Recursively lists every PDF and text file under `folder`, sorted.
/// Files of any other type are ignored.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if document_kind(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

/// Loads every supported file under `folder`. A file that cannot be read is
/// recorded in [`LoadReport::skipped`] and loading continues.
pub fn load_documents(folder: &Path) -> Result<LoadReport, IngestError> {
    if !folder.exists() {
        return Err(IngestError::MissingPath(folder.display().to_string()));
    }

    let mut report = LoadReport::default();

    for path in discover_documents(folder) {
        match load_file(&path) {
            Ok(documents) => {
                debug!(path = %path.display(), documents = documents.len(), "loaded file");
                report.documents.extend(documents);
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipping unreadable file");
                report.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

pub fn load_file(path: &Path) -> Result<Vec<Document>, IngestError> {
    let kind = document_kind(path).ok_or_else(|| {
        IngestError::PdfParse(format!("unsupported file type: {}", path.display()))
    })?;
    let title = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();
    let document_id = generate_document_id(path);
    let source_path = path.to_string_lossy().to_string();

    let documents = match kind {
        DocumentKind::Pdf => extract_page_texts(path)?
            .into_iter()
            .map(|page| Document {
                document_id: document_id.clone(),
                source_path: source_path.clone(),
                title: title.clone(),
                page: Some(page.number),
                kind,
                text: page.text,
            })
            .collect(),
        DocumentKind::Text => vec![Document {
            document_id,
            source_path,
            title,
            page: None,
            kind,
            text: read_text_file(path)?,
        }],
    };

    Ok(documents)
}

fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{discover_documents, load_documents};
    use crate::models::DocumentKind;
    use crate::IngestError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_skips_other_types() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("ug");
        fs::create_dir(&nested)?;

        fs::write(dir.path().join("fees.txt"), "Tuition is 5000 per year.")?;
        fs::write(nested.join("syllabus.PDF"), b"%PDF-1.4\n%fake")?;
        fs::write(dir.path().join("logo.png"), b"png")?;
        fs::write(nested.join("notes.md"), "# notes")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|path| path.ends_with("fees.txt")));
        assert!(files.iter().any(|path| path.ends_with("syllabus.PDF")));
        Ok(())
    }

    #[test]
    fn text_files_load_as_single_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("fees.txt"), "Tuition is 5000 per year.")?;

        let report = load_documents(dir.path())?;
        assert_eq!(report.documents.len(), 1);
        assert!(report.skipped.is_empty());

        let document = &report.documents[0];
        assert_eq!(document.kind, DocumentKind::Text);
        assert_eq!(document.title, "fees.txt");
        assert_eq!(document.page, None);
        assert_eq!(document.text, "Tuition is 5000 per year.");
        Ok(())
    }

    #[test]
    fn unreadable_pdfs_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(dir.path().join("info.txt"), "Campus opens at 9.")?;

        let report = load_documents(dir.path())?;
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        Ok(())
    }

    #[test]
    fn missing_folder_is_reported() {
        let result = load_documents(std::path::Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(IngestError::MissingPath(_))));
    }
}
