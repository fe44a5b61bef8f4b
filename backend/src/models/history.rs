use chrono::{DateTime, Local};
use image::{DynamicImage, GenericImageView};
use serde::Serialize;

use crate::models::params::ProcessingParameters;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub original_name: String,
    pub original: DynamicImage,
    pub processed: DynamicImage,
    /// Encoded download artifact of `processed`.
    pub processed_bytes: Vec<u8>,
    pub parameters: ProcessingParameters,
}

impl HistoryEntry {
    pub fn new(
        original_name: &str,
        original: DynamicImage,
        processed: DynamicImage,
        processed_bytes: Vec<u8>,
        parameters: ProcessingParameters,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Local::now(),
            original_name: original_name.to_string(),
            original,
            processed,
            processed_bytes,
            parameters,
        }
    }

    pub fn summary(&self) -> HistorySummary {
        let (original_width, original_height) = self.original.dimensions();
        let (width, height) = self.processed.dimensions();
        HistorySummary {
            id: self.id.clone(),
            timestamp: self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            original_name: self.original_name.clone(),
            original_width,
            original_height,
            width,
            height,
            parameters: self.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub id: String,
    pub timestamp: String,
    pub original_name: String,
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
    pub parameters: ProcessingParameters,
}

/// Append-only record of one session's processed images.
#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Newest first.
    pub fn recent(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
