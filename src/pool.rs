//! Keyed facade over multiple independent connections.

use std::collections::HashMap;

use crate::Result;
use crate::config::Settings;
use crate::connection::Connection;
use crate::error::UnknownConnection;
use crate::operation::{Handler, OperationSpec};

/// A fixed set of named [`Connection`]s.
///
/// The set of keys is established at construction and never grows; every
/// lookup of an unconfigured key is an [`UnknownConnection`] error rather
/// than an implicit default.
#[derive(Debug)]
pub struct ConnectionPool {
    connections: HashMap<String, Connection>,
}

impl ConnectionPool {
    /// Builds a connection per entry. Connections are created eagerly but no
    /// sockets are opened yet.
    pub fn new(settings: HashMap<String, Settings>) -> Result<Self> {
        let mut connections = HashMap::with_capacity(settings.len());
        for (key, settings) in settings {
            connections.insert(key, Connection::new(&settings)?);
        }

        Ok(Self { connections })
    }

    /// Looks up the connection for `key`.
    pub fn connection(&self, key: &str) -> Result<Connection> {
        self.connections
            .get(key)
            .cloned()
            .ok_or_else(|| UnknownConnection { key: key.to_owned() }.into())
    }

    pub fn open(&self, key: &str) -> Result<()> {
        self.connection(key)?.open()
    }

    pub fn close(&self, key: &str) -> Result<()> {
        self.connection(key)?.close();
        Ok(())
    }

    pub fn add_operation(&self, key: &str, spec: OperationSpec) -> Result<()> {
        self.connection(key)?.add_operation(spec)
    }

    pub fn remove_operation(&self, key: &str, method: &str) -> Result<()> {
        self.connection(key)?.remove_operation(method);
        Ok(())
    }

    pub fn remove_handler(&self, key: &str, method: &str, handler: &Handler) -> Result<()> {
        self.connection(key)?.remove_handler(method, handler);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    fn pool() -> ConnectionPool {
        let mut settings = HashMap::new();
        settings.insert("prices".to_owned(), Settings::new("wss://example.com/prices"));
        settings.insert("trades".to_owned(), Settings::new("wss://example.com/trades"));
        ConnectionPool::new(settings).unwrap()
    }

    #[tokio::test]
    async fn configured_keys_are_resolvable() {
        let pool = pool();

        assert_eq!(pool.len(), 2);
        pool.connection("prices").unwrap();
        pool.connection("trades").unwrap();
    }

    #[tokio::test]
    async fn unknown_key_is_a_configuration_error() {
        let pool = pool();

        let error = pool.connection("books").unwrap_err();

        assert_eq!(error.kind(), Kind::Configuration);
        let source = error.downcast_ref::<UnknownConnection>().unwrap();
        assert_eq!(source.key, "books");
    }

    #[tokio::test]
    async fn unknown_key_fails_delegated_calls() {
        let pool = pool();
        let spec = OperationSpec::new("subscribe", || json!({}));

        pool.add_operation("books", spec).unwrap_err();
        pool.remove_operation("books", "subscribe").unwrap_err();
    }

    #[tokio::test]
    async fn invalid_url_fails_construction() {
        let mut settings = HashMap::new();
        settings.insert("bad".to_owned(), Settings::new("not a url"));

        ConnectionPool::new(settings).unwrap_err();
    }
}
