//! Document loaders.
//!
//! A loader turns a source string (file path, directory or URL) into
//! documents. The loader is chosen by `loader.type`:
//! `text`, `directory` (default) or `web`.

use crate::document::Document;
use crate::parser::{clean_html, is_likely_text};
use modrag_core::{AppError, AppResult, Params};
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

/// Default extensions picked up by the directory loader.
pub const DEFAULT_EXTENSIONS: [&str; 2] = [".txt", ".md"];

const WEB_TIMEOUT_SECS: u64 = 30;

/// Trait for document loaders.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    /// Loader name as used in configuration.
    fn name(&self) -> &str;

    /// Load every document reachable from one source.
    async fn load(&self, source: &str) -> AppResult<Vec<Document>>;

    /// Load several sources, concatenating results in order.
    async fn load_many(&self, sources: &[String]) -> AppResult<Vec<Document>> {
        let mut documents = Vec::new();
        for source in sources {
            documents.extend(self.load(source).await?);
        }
        Ok(documents)
    }
}

/// Build a loader from the `loader` parameter section.
pub fn create_loader(params: &Params) -> AppResult<Box<dyn Loader>> {
    match params.strategy_or("directory").as_str() {
        "text" => Ok(Box::new(TextLoader::from_params(params))),
        "directory" => Ok(Box::new(DirectoryLoader::from_params(params))),
        "web" => Ok(Box::new(WebLoader::new()?)),
        "pdf" => Err(AppError::Config(
            "The pdf loader is not available; convert documents to text or markdown".to_string(),
        )),
        other => {
            tracing::warn!("Unknown loader type '{}', using directory loader", other);
            Ok(Box::new(DirectoryLoader::from_params(params)))
        }
    }
}

fn file_metadata(path: &Path, file_type: &str) -> Document {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Document::new(String::new())
        .with_meta("source", path.to_string_lossy().to_string())
        .with_meta("filename", filename)
        .with_meta("file_type", file_type)
}

/// Loads a single text file.
#[derive(Debug, Clone)]
pub struct TextLoader {
    encoding: String,
}

impl TextLoader {
    pub fn new() -> Self {
        Self {
            encoding: "utf-8".to_string(),
        }
    }

    pub fn from_params(params: &Params) -> Self {
        Self {
            encoding: params.str_or("encoding", "utf-8").to_lowercase(),
        }
    }

    fn read(&self, path: &Path) -> AppResult<String> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::Knowledge(format!("Failed to read {:?}: {}", path, e)))?;

        if matches!(self.encoding.as_str(), "utf-8" | "utf8") {
            String::from_utf8(bytes)
                .map_err(|e| AppError::Knowledge(format!("{:?} is not valid UTF-8: {}", path, e)))
        } else {
            tracing::warn!(
                encoding = %self.encoding,
                "Only UTF-8 is decoded natively; reading {:?} lossily",
                path
            );
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    fn load_path(&self, path: &Path) -> AppResult<Document> {
        let mut document = file_metadata(path, "text");
        document.content = self.read(path)?;
        Ok(document)
    }
}

impl Default for TextLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Loader for TextLoader {
    fn name(&self) -> &str {
        "text"
    }

    async fn load(&self, source: &str) -> AppResult<Vec<Document>> {
        let document = self.load_path(Path::new(source))?;
        tracing::debug!("Loaded {} ({} chars)", source, document.char_len());
        Ok(vec![document])
    }
}

/// Walks a directory and loads every file with a matching extension.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    extensions: Vec<String>,
    text: TextLoader,
}

impl DirectoryLoader {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| normalize_extension(&e))
                .collect(),
            text: TextLoader::new(),
        }
    }

    pub fn from_params(params: &Params) -> Self {
        let extensions = params.str_list("file_extensions").unwrap_or_else(|| {
            DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
        });
        let mut loader = Self::new(extensions);
        loader.text = TextLoader::from_params(params);
        loader
    }

    fn should_include(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&format!(".{}", e.to_lowercase())))
            .unwrap_or(false)
    }
}

fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

#[async_trait::async_trait]
impl Loader for DirectoryLoader {
    fn name(&self) -> &str {
        "directory"
    }

    async fn load(&self, source: &str) -> AppResult<Vec<Document>> {
        let root = Path::new(source);
        if !root.exists() {
            return Err(AppError::Knowledge(format!("Path not found: {}", source)));
        }

        let mut documents = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !self.should_include(path) {
                continue;
            }

            match self.text.load_path(path) {
                Ok(document) if is_likely_text(&document.content) => {
                    tracing::debug!("Loaded {:?}", path);
                    documents.push(document);
                }
                Ok(_) => tracing::warn!("Skipping likely binary file: {:?}", path),
                Err(e) => tracing::warn!("Failed to load {:?}: {}", path, e),
            }
        }

        tracing::info!("Loaded {} documents from {}", documents.len(), source);
        Ok(documents)
    }
}

/// Fetches web pages and strips their markup.
pub struct WebLoader {
    client: reqwest::Client,
}

impl WebLoader {
    pub fn new() -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEB_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Knowledge(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Loader for WebLoader {
    fn name(&self) -> &str {
        "web"
    }

    async fn load(&self, source: &str) -> AppResult<Vec<Document>> {
        tracing::debug!("Fetching {}", source);

        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|e| AppError::Knowledge(format!("Failed to fetch {}: {}", source, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Knowledge(format!(
                "Failed to fetch {}: HTTP {}",
                source,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Knowledge(format!("Failed to read {}: {}", source, e)))?;

        let document = Document::new(clean_html(&body))
            .with_meta("source", source)
            .with_meta("file_type", "web");

        Ok(vec![document])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_text_loader_metadata() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, "Modular RAG splits the pipeline into stages.").unwrap();

        let docs = TextLoader::new()
            .load(path.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta_str("filename"), Some("notes.txt"));
        assert_eq!(docs[0].meta_str("file_type"), Some("text"));
        assert!(docs[0].content.starts_with("Modular RAG"));
    }

    #[tokio::test]
    async fn test_directory_loader_filters_extensions() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("a.md"), "# Title").unwrap();
        fs::write(temp.path().join("nested/b.TXT"), "body").unwrap();
        fs::write(temp.path().join("c.rs"), "fn main() {}").unwrap();
        fs::write(temp.path().join("d.txt"), "bin\0ary").unwrap();

        let loader = DirectoryLoader::from_params(&Params::new());
        let docs = loader.load(temp.path().to_str().unwrap()).await.unwrap();

        let names: Vec<_> = docs.iter().filter_map(|d| d.meta_str("filename")).collect();
        assert_eq!(names, vec!["a.md", "b.TXT"]);
    }

    #[tokio::test]
    async fn test_directory_loader_accepts_single_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("one.md");
        fs::write(&path, "single").unwrap();

        let loader = DirectoryLoader::new(vec!["md".to_string()]);
        let docs = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_load_many_preserves_order() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("z.txt");
        let second = temp.path().join("a.txt");
        fs::write(&first, "first").unwrap();
        fs::write(&second, "second").unwrap();

        let sources = vec![
            first.to_string_lossy().to_string(),
            second.to_string_lossy().to_string(),
        ];
        let docs = TextLoader::new().load_many(&sources).await.unwrap();
        assert_eq!(docs[0].content, "first");
        assert_eq!(docs[1].content, "second");
    }

    #[test]
    fn test_create_loader_types() {
        assert_eq!(create_loader(&Params::new()).unwrap().name(), "directory");
        assert_eq!(
            create_loader(&Params::new().with("type", "text")).unwrap().name(),
            "text"
        );
        assert_eq!(
            create_loader(&Params::new().with("type", "docx")).unwrap().name(),
            "directory"
        );
        assert!(create_loader(&Params::new().with("type", "pdf")).is_err());
    }
}
