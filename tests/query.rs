//! Basic query execution against a live server.
//!
//! Requires a reachable PostgreSQL server; set `DATABASE_URL` to point at
//! one, or run against `localhost` with trust auth.

use std::env;

use pgwire_engine::tokio::Conn;
use pgwire_engine::{Error, Opts, Value};

fn test_opts() -> Opts {
    let url = env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".into());
    Opts::try_from(url.as_str()).expect("invalid DATABASE_URL")
}

#[tokio::test]
async fn simple_scalar_query_returns_one_row() {
    let conn = Conn::connect(test_opts()).await.expect("connect");
    let result = conn.query("SELECT 1", &[]).await.expect("query");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0], vec![Value::Int4(1)]);
}

#[tokio::test]
async fn parameterized_query_round_trips_the_argument() {
    let conn = Conn::connect(test_opts()).await.expect("connect");
    let result = conn
        .query("SELECT $1::int4 + 1", &[Value::Int4(41)])
        .await
        .expect("query");
    assert_eq!(result.rows[0], vec![Value::Int4(42)]);
}

#[tokio::test]
async fn server_error_does_not_poison_the_connection() {
    let conn = Conn::connect(test_opts()).await.expect("connect");

    let err = conn.query("SELECT * FROM no_such_table_at_all", &[]).await;
    assert!(matches!(err, Err(Error::Server(_))));

    // the connection recovers: ReadyForQuery still arrived, so the next
    // query on the same Conn succeeds.
    let result = conn.query("SELECT 2", &[]).await.expect("query after error");
    assert_eq!(result.rows[0], vec![Value::Int4(2)]);
}

#[tokio::test]
async fn typed_query_skips_describe_and_still_decodes_rows() {
    use pgwire_engine::protocol::types::oid;

    let conn = Conn::connect(test_opts()).await.expect("connect");
    let result = conn
        .query_typed(
            "SELECT $1::int4 + 1",
            &[Value::Int4(41)],
            &[oid::INT4],
            &[oid::INT4],
        )
        .await
        .expect("typed query");
    assert_eq!(result.rows[0], vec![Value::Int4(42)]);
}

#[tokio::test]
async fn parameter_status_updates_are_observable_afterward() {
    let conn = Conn::connect(test_opts()).await.expect("connect");
    conn.query("SET client_encoding = 'UTF8'", &[]).await.expect("set");
    let params = conn.parameters().await.expect("parameters");
    assert_eq!(params.get("client_encoding").map(String::as_str), Some("UTF8"));
}

#[tokio::test]
async fn fatal_error_during_startup_is_reported() {
    let mut opts = test_opts();
    opts.user = "no-such-role-should-exist".into();
    opts.password = Some("wrong".into());

    let result = Conn::connect(opts).await;
    assert!(result.is_err());
}
