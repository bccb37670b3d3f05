use tantivy::{
    Index,
    IndexReader,
    TantivyDocument,
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};
use tracing::{debug, info};

use crate::{
    backend::{KeywordSearch, Metadata, RetrievalCandidate},
    corpus::CorpusDocument,
    error::Result,
};

/// Field names used in the schema.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const TEXT: &str = "text";
    pub const METADATA: &str = "metadata";
}

const WRITER_MEMORY: usize = 15_000_000;

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    doc_id: Field,
    text: Field,
    metadata: Field,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);

    let text_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let text = builder.add_text_field(fields::TEXT, text_opts);

    // Serialized JSON, returned as-is.
    let metadata = builder.add_text_field(fields::METADATA, STORED);

    let schema = builder.build();
    (
        schema,
        SchemaFields {
            doc_id,
            text,
            metadata,
        },
    )
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

/// In-memory BM25 index over a corpus.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

impl KeywordIndex {
    pub fn build(documents: &[CorpusDocument]) -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizers(&index);

        let mut writer: tantivy::IndexWriter = index.writer(WRITER_MEMORY)?;
        for document in documents {
            let metadata = serde_json::to_string(&document.metadata)?;
            writer.add_document(doc!(
                fields.doc_id => document.id.as_str(),
                fields.text => document.text.as_str(),
                fields.metadata => metadata,
            ))?;
        }
        writer.commit()?;

        let reader = index.reader()?;
        reader.reload()?;
        info!(documents = documents.len(), "built keyword index");

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn search_index(
        &self,
        query_str: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;
        let searcher = self.reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![f.text]);
        let (query, errors) = parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "lenient keyword query parse");
        }

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let metadata: Metadata =
                serde_json::from_str(&extract_text(&doc, f.metadata))
                    .unwrap_or_default();
            results.push(
                RetrievalCandidate::new(
                    extract_text(&doc, f.doc_id),
                    extract_text(&doc, f.text),
                )
                .with_metadata(metadata),
            );
        }

        Ok(results)
    }
}

impl KeywordSearch for KeywordIndex {
    fn search(&self, text: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        self.search_index(text, k)
    }
}

impl std::fmt::Debug for KeywordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
