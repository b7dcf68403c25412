//! DynamoDB-backed record store.
//!
//! Rows are keyed by a composite `id = "{owner_id}_{image_id}"` string.
//! Updates are read-validate-write: the current row is fetched, the
//! transition checked, and the changed fields written with an update
//! expression. Concurrent writers remain last-writer-wins (see DESIGN.md).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};

use crate::error::RecordError;

use super::record::{
    DerivationKind, ImageRecord, ImageState, MediaType, RecordStore, RecordUpdate,
};

/// DynamoDB implementation of [`RecordStore`].
#[derive(Clone)]
pub struct DynamoRecordStore {
    client: Client,
    table: String,
}

impl DynamoRecordStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// The table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn row_id(owner_id: u64, image_id: &str) -> String {
        format!("{}_{}", owner_id, image_id)
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn insert(&self, record: ImageRecord) -> Result<(), RecordError> {
        let mut item = HashMap::from([
            (
                "id".to_string(),
                AttributeValue::S(Self::row_id(record.owner_id, &record.image_id)),
            ),
            (
                "ownerId".to_string(),
                AttributeValue::N(record.owner_id.to_string()),
            ),
            ("imageId".to_string(), AttributeValue::S(record.image_id.clone())),
            (
                "originalName".to_string(),
                AttributeValue::S(record.original_name.clone()),
            ),
            (
                "state".to_string(),
                AttributeValue::S(record.state.as_str().to_string()),
            ),
            (
                "kind".to_string(),
                AttributeValue::S(record.kind.as_str().to_string()),
            ),
            (
                "createdAt".to_string(),
                AttributeValue::S(record.created_at.to_rfc3339()),
            ),
            (
                "updatedAt".to_string(),
                AttributeValue::S(record.updated_at.to_rfc3339()),
            ),
        ]);

        if let Some(media_type) = record.media_type {
            item.insert(
                "mediaType".to_string(),
                AttributeValue::S(media_type.extension().to_string()),
            );
        }
        if let Some(width) = record.width {
            item.insert("width".to_string(), AttributeValue::N(width.to_string()));
        }
        if let Some(height) = record.height {
            item.insert("height".to_string(), AttributeValue::N(height.to_string()));
        }
        if let Some(zoom) = record.max_zoom_level {
            item.insert(
                "maxZoomLevel".to_string(),
                AttributeValue::N(zoom.to_string()),
            );
        }

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RecordError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(
        &self,
        owner_id: u64,
        image_id: &str,
    ) -> Result<Option<ImageRecord>, RecordError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(Self::row_id(owner_id, image_id)))
            .send()
            .await
            .map_err(|e| RecordError::Backend(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(parse_record(&item)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        owner_id: u64,
        image_id: &str,
        update: RecordUpdate,
    ) -> Result<(), RecordError> {
        let current = self
            .get(owner_id, image_id)
            .await?
            .ok_or_else(|| RecordError::NotFound {
                owner_id,
                image_id: image_id.to_string(),
            })?;

        update.validate(&current)?;
        let mut applied = current;
        update.apply(&mut applied, Utc::now());

        let mut set_parts = vec!["#st = :state", "updatedAt = :updated"];
        let mut remove_parts: Vec<&str> = Vec::new();

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(Self::row_id(owner_id, image_id)))
            .expression_attribute_names("#st", "state")
            .expression_attribute_values(
                ":state",
                AttributeValue::S(applied.state.as_str().to_string()),
            )
            .expression_attribute_values(
                ":updated",
                AttributeValue::S(applied.updated_at.to_rfc3339()),
            );

        if let Some(media_type) = applied.media_type {
            set_parts.push("mediaType = :mt");
            request = request.expression_attribute_values(
                ":mt",
                AttributeValue::S(media_type.extension().to_string()),
            );
        }

        match (applied.width, applied.height, applied.max_zoom_level) {
            (Some(width), Some(height), Some(zoom)) => {
                set_parts.push("width = :w");
                set_parts.push("height = :h");
                set_parts.push("maxZoomLevel = :z");
                request = request
                    .expression_attribute_values(":w", AttributeValue::N(width.to_string()))
                    .expression_attribute_values(":h", AttributeValue::N(height.to_string()))
                    .expression_attribute_values(":z", AttributeValue::N(zoom.to_string()));
            }
            _ => {
                remove_parts.extend(["width", "height", "maxZoomLevel"]);
            }
        }

        let mut expression = format!("SET {}", set_parts.join(", "));
        if !remove_parts.is_empty() {
            expression.push_str(&format!(" REMOVE {}", remove_parts.join(", ")));
        }

        request
            .update_expression(expression)
            .send()
            .await
            .map_err(|e| RecordError::Backend(e.to_string()))?;

        Ok(())
    }
}

// =============================================================================
// Attribute Parsing
// =============================================================================

fn attr_s<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a str, RecordError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.as_str())
        .ok_or_else(|| RecordError::Backend(format!("missing string attribute {}", name)))
}

fn attr_n_opt(item: &HashMap<String, AttributeValue>, name: &str) -> Option<u32> {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

fn parse_timestamp(value: &str, name: &str) -> Result<DateTime<Utc>, RecordError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RecordError::Backend(format!("bad timestamp {}: {}", name, e)))
}

fn parse_record(item: &HashMap<String, AttributeValue>) -> Result<ImageRecord, RecordError> {
    let owner_id: u64 = item
        .get("ownerId")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| RecordError::Backend("missing numeric attribute ownerId".to_string()))?;

    let state = match attr_s(item, "state")? {
        "pending" => ImageState::Pending,
        "processing" => ImageState::Processing,
        "ready" => ImageState::Ready,
        "failed" => ImageState::Failed,
        other => {
            return Err(RecordError::Backend(format!("unknown state {:?}", other)));
        }
    };

    let kind = DerivationKind::from_str_opt(attr_s(item, "kind")?)
        .ok_or_else(|| RecordError::Backend("unknown derivation kind".to_string()))?;

    let media_type = item
        .get("mediaType")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| MediaType::from_extension(s));

    Ok(ImageRecord {
        owner_id,
        image_id: attr_s(item, "imageId")?.to_string(),
        original_name: attr_s(item, "originalName")?.to_string(),
        media_type,
        state,
        width: attr_n_opt(item, "width"),
        height: attr_n_opt(item, "height"),
        max_zoom_level: attr_n_opt(item, "maxZoomLevel"),
        kind,
        created_at: parse_timestamp(attr_s(item, "createdAt")?, "createdAt")?,
        updated_at: parse_timestamp(attr_s(item, "updatedAt")?, "updatedAt")?,
    })
}
