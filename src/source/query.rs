//! SQL for paginated source queries
//!
//! Identifiers come from configuration and are validated and quoted here;
//! cursor values are always passed as bind parameters.

use chrono::{DateTime, Utc};

use crate::savepoint::{JobMode, SavePoint};

use super::SourceError;

/// Quote a single SQL identifier, rejecting anything outside `[A-Za-z_][A-Za-z0-9_$]*`
pub fn quote_ident(name: &str) -> Result<String, String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid_start && valid_rest {
        Ok(format!("\"{name}\""))
    } else {
        Err(format!("invalid SQL identifier '{name}'"))
    }
}

/// Quote a possibly schema-qualified name such as `public.orders`
pub fn quote_qualified(name: &str) -> Result<String, String> {
    name.split('.')
        .map(quote_ident)
        .collect::<Result<Vec<_>, _>>()
        .map(|parts| parts.join("."))
}

/// A bind parameter for a page query
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// A page query ready to execute
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub sql: String,
    pub binds: Vec<Bind>,
}

/// Quoted names of the table and columns a job reads
#[derive(Debug, Clone)]
pub struct SourceTable {
    table: String,
    id_column: String,
    timestamp_column: Option<String>,
}

impl SourceTable {
    pub fn new(
        table: &str,
        id_column: &str,
        timestamp_column: Option<&str>,
    ) -> Result<Self, String> {
        Ok(Self {
            table: quote_qualified(table)?,
            id_column: quote_ident(id_column)?,
            timestamp_column: timestamp_column.map(quote_ident).transpose()?,
        })
    }

    /// Timestamp column as `timestamptz`, so `timestamp without time zone`
    /// columns decode and compare against the bound cursor the same way
    fn timestamp_expr(column: &str) -> String {
        format!("t.{column}::timestamptz")
    }

    fn select_clause(&self) -> String {
        let updated_at = match &self.timestamp_column {
            Some(ts) => Self::timestamp_expr(ts),
            None => "NULL::timestamptz".to_string(),
        };
        format!(
            "SELECT t.{id}::text AS record_id, {updated_at} AS record_updated_at, \
             to_jsonb(t) AS record_fields FROM {table} AS t",
            id = self.id_column,
            table = self.table,
        )
    }

    /// Build the query for the page after `save_point`
    pub fn page_query(
        &self,
        mode: JobMode,
        save_point: &SavePoint,
        offset: u64,
        limit: u32,
    ) -> Result<PageQuery, SourceError> {
        let select = self.select_clause();
        let id = &self.id_column;
        let limit = Bind::Int(i64::from(limit));

        let query = match (mode, save_point) {
            (JobMode::Default, SavePoint::Offset { .. }) => PageQuery {
                sql: format!("{select} ORDER BY t.{id} LIMIT $1 OFFSET $2"),
                binds: vec![
                    limit,
                    Bind::Int(i64::try_from(offset).map_err(SourceError::query)?),
                ],
            },
            (JobMode::Timestamp, SavePoint::Timestamp { timestamp, last_id }) => {
                let ts = self
                    .timestamp_column
                    .as_deref()
                    .map(Self::timestamp_expr)
                    .ok_or_else(|| {
                        SourceError::UnsupportedCursor(
                            "timestamp mode requires a timestamp column".to_string(),
                        )
                    })?;
                let order = format!("ORDER BY {ts}, t.{id}::text COLLATE \"C\"");
                match last_id {
                    Some(last_id) => PageQuery {
                        sql: format!(
                            "{select} WHERE {ts} > $1 OR ({ts} = $1 AND t.{id}::text COLLATE \"C\" > $2) \
                             {order} LIMIT $3"
                        ),
                        binds: vec![
                            Bind::Timestamp(*timestamp),
                            Bind::Text(last_id.clone()),
                            limit,
                        ],
                    },
                    None => PageQuery {
                        sql: format!("{select} WHERE {ts} >= $1 {order} LIMIT $2"),
                        binds: vec![Bind::Timestamp(*timestamp), limit],
                    },
                }
            }
            (JobMode::Legacy, SavePoint::Identifier { last_id }) => match last_id {
                Some(last_id) => PageQuery {
                    sql: format!("{select} WHERE t.{id} > $1 ORDER BY t.{id} LIMIT $2"),
                    binds: vec![Bind::Int(*last_id), limit],
                },
                None => PageQuery {
                    sql: format!("{select} ORDER BY t.{id} LIMIT $1"),
                    binds: vec![limit],
                },
            },
            (mode, save_point) => {
                return Err(SourceError::UnsupportedCursor(format!(
                    "{mode} mode cannot fetch from {save_point}"
                )))
            }
        };
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn table() -> SourceTable {
        SourceTable::new("public.orders", "id", Some("updated_at")).unwrap()
    }

    #[test]
    fn test_quote_ident_rejects_injection() {
        assert_eq!(quote_ident("orders").unwrap(), "\"orders\"");
        assert!(quote_ident("orders; DROP TABLE x").is_err());
        assert!(quote_ident("1abc").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("a\"b").is_err());
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(
            quote_qualified("sales.orders").unwrap(),
            "\"sales\".\"orders\""
        );
        assert!(quote_qualified("sales.").is_err());
    }

    #[test]
    fn test_offset_query() {
        let query = table()
            .page_query(JobMode::Default, &SavePoint::Offset { offset: 40 }, 40, 20)
            .unwrap();
        assert!(query.sql.ends_with("ORDER BY t.\"id\" LIMIT $1 OFFSET $2"));
        assert!(query.sql.contains("FROM \"public\".\"orders\" AS t"));
        assert_eq!(query.binds, vec![Bind::Int(20), Bind::Int(40)]);
    }

    #[test]
    fn test_timestamp_query_with_tie_breaker() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let query = table()
            .page_query(
                JobMode::Timestamp,
                &SavePoint::Timestamp {
                    timestamp: ts,
                    last_id: Some("17".to_string()),
                },
                0,
                50,
            )
            .unwrap();
        assert!(query.sql.contains(
            "t.\"updated_at\"::timestamptz > $1 OR (t.\"updated_at\"::timestamptz = $1"
        ));
        assert!(query.sql.contains("COLLATE \"C\" > $2"));
        assert_eq!(
            query.binds,
            vec![Bind::Timestamp(ts), Bind::Text("17".to_string()), Bind::Int(50)]
        );
    }

    #[test]
    fn test_timestamp_query_without_tie_breaker_is_inclusive() {
        let query = table()
            .page_query(
                JobMode::Timestamp,
                &JobMode::Timestamp.initial_save_point(),
                0,
                10,
            )
            .unwrap();
        assert!(query.sql.contains("WHERE t.\"updated_at\"::timestamptz >= $1"));
        assert_eq!(query.binds.len(), 2);
    }

    #[test]
    fn test_timestamp_column_selected_as_timestamptz() {
        let query = table()
            .page_query(
                JobMode::Timestamp,
                &JobMode::Timestamp.initial_save_point(),
                0,
                10,
            )
            .unwrap();
        assert!(query
            .sql
            .contains("t.\"updated_at\"::timestamptz AS record_updated_at"));
        assert!(query
            .sql
            .contains("ORDER BY t.\"updated_at\"::timestamptz, t.\"id\"::text COLLATE \"C\""));

        let untimed = SourceTable::new("orders", "id", None).unwrap();
        let query = untimed
            .page_query(JobMode::Legacy, &SavePoint::Identifier { last_id: None }, 0, 10)
            .unwrap();
        assert!(query.sql.contains("NULL::timestamptz AS record_updated_at"));
    }

    #[test]
    fn test_timestamp_mode_needs_column() {
        let table = SourceTable::new("orders", "id", None).unwrap();
        let err = table
            .page_query(
                JobMode::Timestamp,
                &JobMode::Timestamp.initial_save_point(),
                0,
                10,
            )
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedCursor(_)));
    }

    #[test]
    fn test_legacy_query() {
        let query = table()
            .page_query(JobMode::Legacy, &SavePoint::Identifier { last_id: Some(99) }, 0, 5)
            .unwrap();
        assert!(query.sql.contains("WHERE t.\"id\" > $1 ORDER BY t.\"id\" LIMIT $2"));
        assert_eq!(query.binds, vec![Bind::Int(99), Bind::Int(5)]);
    }

    #[test]
    fn test_mismatched_save_point_rejected() {
        let err = table()
            .page_query(JobMode::Legacy, &SavePoint::Offset { offset: 0 }, 0, 5)
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedCursor(_)));
    }
}
