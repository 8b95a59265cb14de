//! GraphQL page source

use super::types::{PageSource, QuerySpec};
use crate::error::Result;
use crate::graphql::{GraphQlRequest, Page, ResponseInspector};
use crate::http::Transport;
use async_trait::async_trait;
use serde_json::Value;

/// Pages of one resource query, fetched through the transport
#[derive(Debug)]
pub struct GraphQlPageSource<'a> {
    transport: &'a Transport,
    inspector: ResponseInspector,
    spec: QuerySpec,
}

impl<'a> GraphQlPageSource<'a> {
    /// Create a source for a window-bound query
    pub fn new(transport: &'a Transport, inspector: ResponseInspector, spec: QuerySpec) -> Self {
        Self {
            transport,
            inspector,
            spec,
        }
    }

    /// The request sent for a cursor
    pub fn request(&self, cursor: Option<&str>) -> GraphQlRequest {
        let mut request = GraphQlRequest {
            query: self.spec.query.clone(),
            variables: self.spec.variables.clone(),
        };
        request.variables.insert(
            self.spec.page_size_variable.clone(),
            Value::from(self.spec.page_size),
        );
        request.variables.insert(
            self.spec.cursor_variable.clone(),
            cursor.map_or(Value::Null, Value::from),
        );
        request
    }
}

#[async_trait]
impl PageSource for GraphQlPageSource<'_> {
    async fn fetch(&self, cursor: Option<&str>) -> Result<Page> {
        let request = self.request(cursor);
        let response = self
            .transport
            .send(&self.spec.resource, &request, &self.inspector)
            .await?;
        self.inspector.page(
            &self.spec.resource,
            &response.body,
            &self.spec.connection_path,
            response.usage,
        )
    }
}
