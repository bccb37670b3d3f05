use std::{collections::HashSet, path::Path};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    backend::Metadata,
    error::{Error, Result},
};

/// One searchable document from a corpus file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Load a corpus from a JSON array or a JSON Lines file.
///
/// Blank lines are skipped. Documents with an empty id or text are dropped,
/// and of several documents sharing an id only the first is kept.
pub fn load(path: &Path) -> Result<Vec<CorpusDocument>> {
    if !path.exists() {
        return Err(Error::NotFound {
            kind: "corpus",
            name: path.display().to_string(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    let docs = parse(&raw).map_err(|e| match e {
        Error::Config(msg) => {
            Error::Config(format!("{}: {msg}", path.display()))
        }
        other => other,
    })?;
    info!(path = %path.display(), documents = docs.len(), "loaded corpus");
    Ok(docs)
}

pub fn parse(raw: &str) -> Result<Vec<CorpusDocument>> {
    let parsed: Vec<CorpusDocument> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid corpus: {e}")))?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::Config(format!("line {}: {e}", i + 1))
                })
            })
            .collect::<Result<_>>()?
    };

    let mut seen = HashSet::new();
    let mut docs = Vec::with_capacity(parsed.len());
    for doc in parsed {
        if doc.id.trim().is_empty() || doc.text.trim().is_empty() {
            warn!(id = %doc.id, "skipping document with empty id or text");
            continue;
        }
        if !seen.insert(doc.id.clone()) {
            warn!(id = %doc.id, "skipping duplicate document id");
            continue;
        }
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_lines() {
        let raw = r#"{"id": "a", "text": "first"}

{"id": "b", "text": "second", "metadata": {"source": "notes.pdf"}}
"#;
        let docs = parse(raw).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].metadata["source"], "notes.pdf");
        assert!(docs[0].metadata.is_empty());
    }

    #[test]
    fn parses_json_array() {
        let raw = r#"[{"id": "a", "text": "first"}, {"id": "b", "text": "second"}]"#;
        let ids: Vec<String> = parse(raw).unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn bad_line_reports_line_number() {
        let raw = "{\"id\": \"a\", \"text\": \"ok\"}\n{broken\n";
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn duplicates_and_empty_documents_are_dropped() {
        let raw = r#"[
            {"id": "a", "text": "first"},
            {"id": "a", "text": "again"},
            {"id": "", "text": "no id"},
            {"id": "c", "text": "   "}
        ]"#;
        let docs = parse(raw).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "first");
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load(&tmp.path().join("corpus.jsonl")).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "corpus", .. }));
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corpus.jsonl");
        std::fs::write(&path, "{\"id\": \"x\", \"text\": \"hello\"}\n").unwrap();
        assert_eq!(load(&path).unwrap().len(), 1);
    }
}
