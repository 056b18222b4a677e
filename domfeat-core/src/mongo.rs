//! MongoDB access shared by the loader, downloader and selector.

use crate::config::MongoConfig;
use crate::error::{DomfeatError, Result};
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info};

/// Connect and verify the server answers a `ping`.
///
/// A missing connection string is a configuration error; a server that does
/// not answer within the selection timeout is a connection error.
pub async fn connect(config: &MongoConfig) -> Result<Client> {
    let uri = config
        .uri
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            DomfeatError::config(format!(
                "MongoDB connection string is not set ({} or mongo.uri)",
                crate::config::MONGO_URI_ENV
            ))
        })?;

    let mut options = ClientOptions::parse(uri)
        .await
        .map_err(|e| DomfeatError::config(format!("invalid MongoDB connection string: {e}")))?;
    options.server_selection_timeout =
        Some(Duration::from_millis(config.server_selection_timeout_ms));
    options.app_name = Some("domfeat".to_string());

    let client = Client::with_options(options)
        .map_err(|e| DomfeatError::connection(format!("failed to create client: {e}")))?;
    client
        .database(&config.database)
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|e| DomfeatError::connection(format!("MongoDB unreachable: {e}")))?;

    info!(database = %config.database, "Connected to MongoDB");
    Ok(client)
}

pub fn collection(client: &Client, config: &MongoConfig, name: &str) -> Collection<Document> {
    client.database(&config.database).collection::<Document>(name)
}

/// Parse a JSON query filter into a BSON document.
pub fn parse_filter(json: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| DomfeatError::config(format!("invalid query filter: {e}")))?;
    if !value.is_object() {
        return Err(DomfeatError::config("query filter must be a JSON object"));
    }
    mongodb::bson::to_document(&value)
        .map_err(|e| DomfeatError::config(format!("invalid query filter: {e}")))
}

/// Filter excluding documents whose domain is in `exclude`.
pub fn exclusion_filter(domain_field: &str, exclude: &HashSet<String>) -> Document {
    if exclude.is_empty() {
        return Document::new();
    }
    let mut names: Vec<&String> = exclude.iter().collect();
    names.sort();
    let names: Vec<Bson> = names.into_iter().map(|n| Bson::String(n.clone())).collect();
    let mut filter = Document::new();
    filter.insert(domain_field, doc! { "$nin": names });
    filter
}

/// Distinct domain names of a collection.
pub async fn fetch_domain_names(
    client: &Client,
    config: &MongoConfig,
    name: &str,
) -> Result<BTreeSet<String>> {
    let mut projection = Document::new();
    projection.insert(config.domain_field.as_str(), 1);
    let mut cursor = collection(client, config, name)
        .find(Document::new())
        .projection(projection)
        .await?;

    let mut domains = BTreeSet::new();
    while let Some(doc) = cursor.try_next().await? {
        if let Ok(domain) = doc.get_str(&config.domain_field) {
            domains.insert(domain.to_string());
        }
    }
    debug!(collection = name, count = domains.len(), "Fetched domain names");
    Ok(domains)
}

/// Full documents of a collection matching `filter`.
pub async fn fetch_documents(
    client: &Client,
    config: &MongoConfig,
    name: &str,
    filter: Document,
) -> Result<Vec<Document>> {
    let docs: Vec<Document> = collection(client, config, name)
        .find(filter)
        .await?
        .try_collect()
        .await?;
    debug!(collection = name, count = docs.len(), "Fetched documents");
    Ok(docs)
}

/// Insert documents; returns how many were inserted.
pub async fn insert_documents(
    client: &Client,
    config: &MongoConfig,
    name: &str,
    docs: Vec<Document>,
) -> Result<usize> {
    if docs.is_empty() {
        return Ok(0);
    }
    let result = collection(client, config, name).insert_many(docs).await?;
    Ok(result.inserted_ids.len())
}
