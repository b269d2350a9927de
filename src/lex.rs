//! Tantivy-backed [`ContextIndex`].
//!
//! Every ingested line becomes one document carrying its domain, so a query can
//! be answered either line by line ([`TantivyContextIndex::search`]) or as a
//! ranking of domains ([`TantivyContextIndex::domain_scores`]).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, INDEXED, STORED, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, doc};

use crate::context::ContextIndex;
use crate::error::{CorporaError, Result};
use crate::types::Domain;

const WRITER_HEAP_BYTES: usize = 50 * 1024 * 1024;

/// A line of a corpus that matched a context query.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextHit {
    pub domain: Domain,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    domain: Field,
    content: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let domain = builder.add_u64_field("domain", INDEXED | STORED);
    let content = builder.add_text_field("content", TEXT | STORED);
    (builder.build(), Fields { domain, content })
}

pub struct TantivyContextIndex {
    index: Index,
    fields: Fields,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl TantivyContextIndex {
    /// Open the index in `directory`, creating it if the directory holds none.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        fs_err::create_dir_all(directory)?;
        let (schema, fields) = build_schema();
        let mmap = tantivy::directory::MmapDirectory::open(directory)
            .map_err(|err| CorporaError::ContextIndex {
                reason: format!("cannot open {}: {err}", directory.display()),
            })?;
        let index = Index::open_or_create(mmap, schema)?;
        Self::with_index(index, fields)
    }

    /// Volatile index, used where nothing needs to survive the process.
    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = build_schema();
        Self::with_index(Index::create_in_ram(schema), fields)
    }

    fn with_index(index: Index, fields: Fields) -> Result<Self> {
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            fields,
            writer: Mutex::new(writer),
            reader,
        })
    }

    /// Lines most similar to `query`, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ContextHit>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "lenient context query parse");
        }

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&*parsed, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let domain = doc
                .get_first(self.fields.domain)
                .and_then(|v| v.as_u64())
                .and_then(|v| Domain::try_from(v).ok());
            let text = doc
                .get_first(self.fields.content)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(domain) = domain {
                hits.push(ContextHit {
                    domain,
                    score,
                    text,
                });
            }
        }
        Ok(hits)
    }

    /// Domains ranked by the summed score of their lines among the top `limit` hits.
    pub fn domain_scores(&self, query: &str, limit: usize) -> Result<Vec<(Domain, f32)>> {
        let mut totals: HashMap<Domain, f32> = HashMap::new();
        for hit in self.search(query, limit)? {
            *totals.entry(hit.domain).or_default() += hit.score;
        }
        let mut ranked: Vec<(Domain, f32)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked)
    }

    /// Documents visible to searches.
    #[must_use]
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

impl ContextIndex for TantivyContextIndex {
    fn add(&self, domain: Domain, lines: &[String]) -> Result<()> {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            writer.add_document(doc!(
                self.fields.domain => u64::from(domain),
                self.fields.content => line.as_str(),
            ))?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.commit()?;
        Ok(())
    }

    fn invalidate_cache(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }
}
