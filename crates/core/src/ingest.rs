use crate::chunking::{chunk_text, ChunkingConfig};
use crate::models::Passage;
use crate::IngestError;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use walkdir::WalkDir;

const SOURCE_EXTENSIONS: [&str; 3] = ["txt", "md", "json"];

/// Drops script and style blocks, replaces the remaining tags with spaces and
/// collapses whitespace.
pub fn html_to_text(html: &str) -> Result<String, IngestError> {
    let script_re = Regex::new(r"(?is)<script\b.*?</script>")?;
    let style_re = Regex::new(r"(?is)<style\b.*?</style>")?;
    let tag_re = Regex::new(r"<[^>]+>")?;

    let text = script_re.replace_all(html, "");
    let text = style_re.replace_all(&text, "");
    let text = tag_re.replace_all(&text, " ");
    Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Downloads `url` and returns its text. The body is read incrementally and
/// abandoned as soon as more than `max_bytes` have arrived.
pub async fn fetch_source_text(
    client: &Client,
    url: &str,
    max_bytes: usize,
    timeout: Option<Duration>,
) -> Result<String, IngestError> {
    let parsed = Url::parse(url.trim())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IngestError::InvalidArgument(format!(
            "unsupported url scheme: {}",
            parsed.scheme()
        )));
    }

    let mut request = client.get(parsed.clone());
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let started = std::time::Instant::now();
    let mut response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::HttpStatus {
            url: parsed.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Err(IngestError::PayloadTooLarge { limit: max_bytes });
        }
        body.extend_from_slice(&chunk);
    }
    let body = String::from_utf8_lossy(&body).into_owned();
    debug!(
        url = %parsed,
        bytes = body.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "source fetched"
    );

    if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::String(text)) => Ok(text),
            Ok(value) => Ok(serde_json::to_string_pretty(&value)?),
            Err(error) => {
                warn!(url = %parsed, %error, "json payload did not parse, using raw text");
                Ok(body)
            }
        }
    } else if content_type.contains("html") {
        html_to_text(&body)
    } else {
        Ok(body)
    }
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Text, markdown and JSON files directly inside `folder`, sorted.
pub fn discover_source_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file() && has_source_extension(entry.path()))
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

/// `Cars Lineup.TXT` becomes `cars-lineup`.
pub fn dataset_name_from_path(path: &Path) -> String {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if SOURCE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) => stem,
        _ => file_name,
    };

    let name = stem
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    if name.is_empty() {
        "dataset".to_string()
    } else {
        name
    }
}

fn json_item_segment(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|text| format!("{key}: {text}")))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Splits a source file into passage texts. JSON files are segmented by
/// structure; everything else goes through the chunker.
pub fn read_source_segments(path: &Path, chunking: &ChunkingConfig) -> Result<Vec<String>, IngestError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if !is_json {
        return Ok(chunk_text(&content, *chunking));
    }

    let segments = match serde_json::from_str::<Value>(&content)? {
        Value::Array(items) => items.iter().map(json_item_segment).collect(),
        Value::Object(fields) => vec![serde_json::to_string_pretty(&Value::Object(fields))?],
        Value::String(text) => vec![text],
        other => vec![other.to_string()],
    };

    Ok(segments
        .into_iter()
        .filter(|segment: &String| !segment.trim().is_empty())
        .collect())
}

#[derive(Debug)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub passages: Vec<Passage>,
    pub skipped_files: Vec<SkippedSource>,
}

impl IngestionReport {
    pub fn skip(&mut self, path: PathBuf, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(path = %path.display(), reason = %reason, "source skipped");
        self.skipped_files.push(SkippedSource { path, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn html_is_reduced_to_visible_text() -> Result<(), IngestError> {
        let html = "<html><head><style>body { color: red }</style>\
                    <SCRIPT type=\"text/javascript\">var x = 1;</SCRIPT></head>\
                    <body><h1>Yaris</h1>\n\n<p>ราคา   เริ่มต้น</p></body></html>";
        assert_eq!(html_to_text(html)?, "Yaris ราคา เริ่มต้น");
        Ok(())
    }

    #[test]
    fn discovers_only_top_level_source_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::create_dir(base.join("nested"))?;
        fs::write(base.join("b.md"), "# b")?;
        fs::write(base.join("a.txt"), "a")?;
        fs::write(base.join("c.JSON"), "[]")?;
        fs::write(base.join("image.png"), [0u8, 1, 2])?;
        fs::write(base.join("nested").join("d.txt"), "d")?;

        let names = discover_source_files(base)
            .iter()
            .filter_map(|file| file.file_name().and_then(|name| name.to_str()).map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.txt", "b.md", "c.JSON"]);
        Ok(())
    }

    #[test]
    fn dataset_names_come_from_file_names() {
        assert_eq!(dataset_name_from_path(Path::new("raw/Cars Lineup.TXT")), "cars-lineup");
        assert_eq!(dataset_name_from_path(Path::new("faq.json")), "faq");
        assert_eq!(dataset_name_from_path(Path::new("notes.v2.md")), "notes.v2");
        assert_eq!(dataset_name_from_path(Path::new("archive.tar")), "archive.tar");
    }

    #[test]
    fn json_arrays_become_one_segment_per_item() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file = dir.path().join("faq.json");
        fs::write(
            &file,
            r#"["plain entry", {"question": "ราคา Yaris?", "views": 3}, ""]"#,
        )?;

        let segments = read_source_segments(&file, &ChunkingConfig::default())?;
        assert_eq!(segments, vec!["plain entry", "question: ราคา Yaris?"]);
        Ok(())
    }

    #[test]
    fn json_object_and_scalar_are_single_segments() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let object = dir.path().join("model.json");
        fs::write(&object, r#"{"model": "Yaris"}"#)?;
        let scalar = dir.path().join("count.json");
        fs::write(&scalar, "42")?;

        let config = ChunkingConfig::default();
        assert_eq!(read_source_segments(&object, &config)?, vec!["{\n  \"model\": \"Yaris\"\n}"]);
        assert_eq!(read_source_segments(&scalar, &config)?, vec!["42"]);
        Ok(())
    }

    #[test]
    fn text_files_go_through_the_chunker() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file = dir.path().join("manual.txt");
        fs::write(&file, "x".repeat(250))?;

        let segments = read_source_segments(&file, &ChunkingConfig::new(100, 20))?;
        assert_eq!(segments.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_branches_on_content_type() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<p>Hello <b>world</b></p><script>x()</script>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json("just a string"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
            .mount(&server)
            .await;

        let client = Client::new();
        let limit = 1024;
        let timeout = Some(Duration::from_secs(5));
        assert_eq!(
            fetch_source_text(&client, &format!("{}/page", server.uri()), limit, timeout).await?,
            "Hello world"
        );
        assert_eq!(
            fetch_source_text(&client, &format!("{}/quote", server.uri()), limit, timeout).await?,
            "just a string"
        );
        assert_eq!(
            fetch_source_text(&client, &format!("{}/broken", server.uri()), limit, timeout).await?,
            "{not json"
        );
        Ok(())
    }

    #[tokio::test]
    async fn fetch_rejects_oversized_and_failed_responses() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/large"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new();
        let large = fetch_source_text(&client, &format!("{}/large", server.uri()), 16, None).await;
        assert!(matches!(large, Err(IngestError::PayloadTooLarge { limit: 16 })));

        let gone = fetch_source_text(&client, &format!("{}/gone", server.uri()), 16, None).await;
        assert!(matches!(gone, Err(IngestError::HttpStatus { status: 404, .. })));

        assert!(matches!(
            fetch_source_text(&client, "not a url", 16, None).await,
            Err(IngestError::Url(_))
        ));
        assert!(matches!(
            fetch_source_text(&client, "ftp://example.com/file.txt", 16, None).await,
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }
}
