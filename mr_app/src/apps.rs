//! Map/reduce functions the worker binary can run.

use std::collections::BTreeSet;

use mr::{KeyValue, MapFn, ReduceFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum App {
    /// Word count.
    Wc,
    /// Inverted index: which documents mention each word.
    Indexer,
}

impl App {
    pub fn functions(self) -> (MapFn, ReduceFn) {
        match self {
            App::Wc => (wc_map, wc_reduce),
            App::Indexer => (indexer_map, indexer_reduce),
        }
    }
}

fn words(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
}

pub fn wc_map(_filename: &str, contents: &str) -> anyhow::Result<Vec<KeyValue>> {
    Ok(words(contents).map(|w| KeyValue::new(w, "1")).collect())
}

pub fn wc_reduce(_key: &str, values: &[String]) -> anyhow::Result<String> {
    let mut count: u64 = 0;
    for item in values {
        count += item.parse::<u64>()?;
    }
    Ok(count.to_string())
}

pub fn indexer_map(filename: &str, contents: &str) -> anyhow::Result<Vec<KeyValue>> {
    let unique: BTreeSet<&str> = words(contents).collect();
    Ok(unique
        .into_iter()
        .map(|w| KeyValue::new(w, filename))
        .collect())
}

pub fn indexer_reduce(_key: &str, values: &[String]) -> anyhow::Result<String> {
    let docs: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    let docs: Vec<&str> = docs.into_iter().collect();
    Ok(format!("{} {}", docs.len(), docs.join(",")))
}
