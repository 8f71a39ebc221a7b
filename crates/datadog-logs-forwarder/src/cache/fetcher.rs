// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seam to the resource tagging APIs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::tags::format_aws_tag;

/// Lists every resource of one type together with its tags.
#[async_trait]
pub trait TagFetcher: Send + Sync {
    /// Returns `resource id -> ["key:value", ...]` for all resources.
    async fn fetch_all(&self) -> Result<HashMap<String, Vec<String>>, FetchError>;
}

/// Serves a fixed tag map.
#[derive(Debug, Clone, Default)]
pub struct StaticTagFetcher {
    tags_by_id: HashMap<String, Vec<String>>,
}

impl StaticTagFetcher {
    #[must_use]
    pub fn new(tags_by_id: HashMap<String, Vec<String>>) -> Self {
        Self { tags_by_id }
    }

    /// Builds the map from raw resource tag pairs as returned by the
    /// tagging API, sanitising each pair into a `key:value` tag.
    pub fn from_aws_tags<I, T>(resources: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
        T: IntoIterator<Item = (String, String)>,
    {
        let tags_by_id = resources
            .into_iter()
            .map(|(id, tags)| {
                let tags = tags
                    .into_iter()
                    .map(|(key, value)| format_aws_tag(&key, &value))
                    .collect();
                (id, tags)
            })
            .collect();
        Self { tags_by_id }
    }
}

#[async_trait]
impl TagFetcher for StaticTagFetcher {
    async fn fetch_all(&self) -> Result<HashMap<String, Vec<String>>, FetchError> {
        Ok(self.tags_by_id.clone())
    }
}
