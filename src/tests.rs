//! Statement and connection behaviour against a scripted backend.

use crate::config::{DriverOptions, OldQueryPolicy, StatementOptions};
use crate::connection::{AsyncPoll, AsyncStatus, Connection, CopyMode};
use crate::error::{BindError, CancelError, DriverError};
use crate::pg::{ErrorFields, Format, Param, RawResult, TransactionStatus};
use crate::statement::{BindType, ExecState, Strategy};
use crate::testing::{self, Call, MockBackend};
use crate::types::Oid;
use crate::value::{BindValue, Value};

fn connect(options: DriverOptions) -> Connection<MockBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    Connection::new(MockBackend::new(), options)
}

fn conn() -> Connection<MockBackend> {
    connect(DriverOptions::default())
}

fn one_row(value: &str) -> RawResult {
    testing::tuples(&[("x", Oid::INT4)], &[&[Some(value)]])
}

// ============================================================================
// Planning and execution strategies
// ============================================================================

mod strategies {
    use super::*;

    #[tokio::test]
    async fn test_switch_to_named_after_threshold() {
        let mut conn = connect(DriverOptions::default().switch_prepared(3));
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE id = ?", StatementOptions::default())
            .unwrap();
        stmt.bind(1, 7).unwrap();

        let mut used = Vec::new();
        for _ in 0..5 {
            stmt.execute(&mut conn).await.unwrap();
            used.push(stmt.strategy().unwrap());
            if stmt.iteration() == 2 {
                assert_eq!(conn.backend().prepares(), 0, "no PREPARE before call 3");
            }
        }
        assert_eq!(
            used,
            vec![
                Strategy::Unnamed,
                Strategy::Unnamed,
                Strategy::Named,
                Strategy::Named,
                Strategy::Named
            ]
        );

        let backend = conn.backend();
        assert_eq!(backend.prepares(), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::QueryParams { .. })), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::QueryPrepared { .. })), 3);
        assert!(backend.calls.iter().any(|c| matches!(
            c,
            Call::Prepare { sql, .. } if sql == "SELECT * FROM t WHERE id = $1"
        )));
    }

    #[tokio::test]
    async fn test_non_dml_goes_literal() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("CREATE TABLE t (id int)", StatementOptions::default())
            .unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(stmt.strategy(), Some(Strategy::Literal));
        assert_eq!(conn.backend().queries(), vec!["CREATE TABLE t (id int)"]);
    }

    #[tokio::test]
    async fn test_default_sentinel_forces_literal() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("INSERT INTO t VALUES (?, ?, ?)", StatementOptions::default())
            .unwrap();
        stmt.bind(1, "O'Brien").unwrap();
        stmt.bind(2, BindValue::Default).unwrap();
        stmt.bind(3, BindValue::CurrentTimestamp).unwrap();
        conn.backend_mut().reply_one(RawResult::command("INSERT 0 1"));

        assert_eq!(stmt.execute(&mut conn).await.unwrap(), Some(1));
        assert_eq!(stmt.strategy(), Some(Strategy::Literal));
        assert_eq!(
            conn.backend().queries(),
            vec!["INSERT INTO t VALUES ('O''Brien', DEFAULT, CURRENT_TIMESTAMP)"]
        );
    }

    #[tokio::test]
    async fn test_server_prepare_off_quotes_by_type() {
        let mut conn = connect(DriverOptions::default().server_prepare(false));
        let mut stmt = conn
            .prepare(
                "SELECT * FROM t WHERE id = :id AND flag = :flag",
                StatementOptions::default(),
            )
            .unwrap();
        stmt.bind(":id", 5).unwrap();
        stmt.bind_with(":flag", "yes", BindType::pg(Oid::BOOL))
            .unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(
            conn.backend().queries(),
            vec!["SELECT * FROM t WHERE id = 5 AND flag = TRUE"]
        );
    }

    #[tokio::test]
    async fn test_negative_int_after_minus_stays_an_expression() {
        let mut conn = connect(DriverOptions::default().server_prepare(false));
        let mut stmt = conn
            .prepare("UPDATE t SET a = a-? WHERE id = ?", StatementOptions::default())
            .unwrap();
        stmt.bind(1, -5).unwrap();
        stmt.bind(2, 1).unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(
            conn.backend().queries(),
            vec!["UPDATE t SET a = a- -5 WHERE id = 1"]
        );
    }

    #[tokio::test]
    async fn test_negative_float_after_minus_stays_an_expression() {
        let mut conn = connect(DriverOptions::default().server_prepare(false));
        let mut stmt = conn
            .prepare("UPDATE t SET x = x-? WHERE id = ?", StatementOptions::default())
            .unwrap();
        stmt.bind(1, -1.5).unwrap();
        stmt.bind(2, 1).unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(
            conn.backend().queries(),
            vec!["UPDATE t SET x = x- -1.5 WHERE id = 1"]
        );
    }

    #[tokio::test]
    async fn test_execute_with_binds_positionally() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("INSERT INTO t VALUES (?, ?)", StatementOptions::default())
            .unwrap();
        stmt.execute_with(&mut conn, [Value::Int(1), Value::from("a")])
            .await
            .unwrap();
        assert_eq!(
            conn.backend().calls,
            vec![Call::QueryParams {
                sql: "INSERT INTO t VALUES ($1, $2)".to_string(),
                params: vec![Param::text("1"), Param::text("a")],
            }]
        );

        let err = stmt
            .execute_with(&mut conn, [1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Bind(BindError::UnknownPlaceholder(_))));
    }

    #[tokio::test]
    async fn test_direct_statement_sent_verbatim() {
        let mut conn = conn();
        let affected = conn.run("SET search_path TO app, public").await.unwrap();
        assert_eq!(affected, Some(0));
        assert_eq!(conn.backend().queries(), vec!["SET search_path TO app, public"]);
    }

    #[tokio::test]
    async fn test_prepare_cached_reuses_template() {
        let mut conn = conn();
        let a = conn
            .prepare_cached("SELECT ? + 1", StatementOptions::default())
            .unwrap();
        let b = conn
            .prepare_cached("SELECT ? + 1", StatementOptions::default())
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(conn.template_cache_stats(), (1, 1));
    }
}

// ============================================================================
// Binding checks before any network traffic
// ============================================================================

mod binding {
    use super::*;

    #[tokio::test]
    async fn test_unbound_placeholder_refused() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("INSERT INTO t VALUES ($1,$2)", StatementOptions::default())
            .unwrap();
        stmt.bind(1, 10).unwrap();

        let err = stmt.execute(&mut conn).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Bind(BindError::Unbound(ref p)) if p == "$2"
        ));
        assert!(conn.backend().calls.is_empty());
        assert_eq!(conn.last_error().unwrap().sqlstate, "22023");
    }

    #[tokio::test]
    async fn test_parse_errors_surface_from_prepare() {
        let mut conn = conn();
        let err = conn
            .prepare("SELECT ? WHERE a = $1", StatementOptions::default())
            .unwrap_err();
        assert!(matches!(err, DriverError::Parse(_)));
        assert_eq!(err.sqlstate(), "42601");
    }

    #[tokio::test]
    async fn test_inout_mirrors_fetched_value() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT $1::int + 1 AS x", StatementOptions::default())
            .unwrap();
        stmt.bind(1, BindValue::InOut(Value::Int(1))).unwrap();
        conn.backend_mut().reply_one(one_row("2"));

        stmt.execute(&mut conn).await.unwrap();
        let row = stmt.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get_by_name("x"), Some(&Value::Int(2)));
        assert_eq!(stmt.bound_value(1).unwrap(), Some(&Value::Int(2)));
    }
}

// ============================================================================
// Server-side prepare lifecycle
// ============================================================================

mod prepared {
    use super::*;

    fn eager() -> StatementOptions {
        StatementOptions::default().switch_prepared(0)
    }

    #[tokio::test]
    async fn test_type_change_deallocates_and_reprepares_once() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE id = $1", eager())
            .unwrap();
        stmt.bind_with(1, 1, BindType::pg(Oid::INT4)).unwrap();
        stmt.execute(&mut conn).await.unwrap();
        let first = stmt.prepared_name().unwrap().to_string();
        assert_eq!(conn.backend().prepares(), 1);

        stmt.bind_with(1, 2, BindType::pg(Oid::INT8)).unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(conn.backend().deallocates(), 1);
        assert_eq!(conn.backend().prepares(), 2);
        assert_ne!(stmt.prepared_name(), Some(first.as_str()));
        assert!(conn
            .backend()
            .queries()
            .contains(&format!("DEALLOCATE \"{}\"", first).as_str()));

        // Same type again: nothing more to do
        stmt.bind_with(1, 3, BindType::pg(Oid::INT8)).unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(conn.backend().deallocates(), 1);
        assert_eq!(conn.backend().prepares(), 2);

        let last_types = conn.backend().calls.iter().rev().find_map(|c| match c {
            Call::Prepare { types, .. } => Some(types.clone()),
            _ => None,
        });
        assert_eq!(last_types, Some(vec![Oid::INT8]));
    }

    #[tokio::test]
    async fn test_reprepare_in_failed_transaction_rolls_back_to_savepoint() {
        let mut conn = connect(DriverOptions::default().autocommit(false));
        conn.savepoint("sp1").await.unwrap();
        let mut stmt = conn
            .prepare("UPDATE t SET v = $1", eager())
            .unwrap();
        stmt.bind_with(1, 1, BindType::pg(Oid::INT4)).unwrap();
        stmt.execute(&mut conn).await.unwrap();

        conn.backend_mut()
            .reply_one(testing::error("23514", "check constraint violated"));
        let err = stmt.execute(&mut conn).await.unwrap_err();
        assert_eq!(err.sqlstate(), "23514");
        assert_eq!(conn.transaction_status(), TransactionStatus::Failed);

        stmt.bind_with(1, 2, BindType::pg(Oid::INT8)).unwrap();
        stmt.execute(&mut conn).await.unwrap();

        let queries = conn.backend().queries();
        let rollback = queries
            .iter()
            .position(|q| *q == "ROLLBACK TO SAVEPOINT \"sp1\"")
            .unwrap();
        let deallocate = queries
            .iter()
            .position(|q| q.starts_with("DEALLOCATE"))
            .unwrap();
        assert!(rollback < deallocate);
        assert_eq!(conn.savepoints(), &["sp1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_deallocate_is_not_fatal() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE id = $1", eager())
            .unwrap();
        stmt.bind_with(1, 1, BindType::pg(Oid::INT4)).unwrap();
        stmt.execute(&mut conn).await.unwrap();

        conn.backend_mut().deallocate_error =
            Some(ErrorFields::local("26000", "prepared statement does not exist"));
        stmt.bind_with(1, 1, BindType::pg(Oid::INT8)).unwrap();
        assert!(stmt.execute(&mut conn).await.is_ok());
        assert_eq!(conn.backend().prepares(), 2);
    }

    #[tokio::test]
    async fn test_prepare_failure_falls_back_to_unnamed() {
        let mut conn = conn();
        conn.backend_mut().prepare_error = Some(ErrorFields::local(
            "42P18",
            "could not determine data type of parameter $1",
        ));
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE id = $1", eager())
            .unwrap();
        stmt.bind(1, 1).unwrap();

        assert!(stmt.execute(&mut conn).await.is_ok());
        assert_eq!(stmt.strategy(), Some(Strategy::Unnamed));
        assert_eq!(stmt.prepare_error().unwrap().sqlstate, "42P18");
        assert_eq!(conn.last_error().unwrap().sqlstate, "42P18");
        assert_eq!(stmt.prepared_name(), None);

        // Later executions stay unnamed without retrying the prepare
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(stmt.strategy(), Some(Strategy::Unnamed));
        assert_eq!(conn.backend().prepares(), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_in_transaction_is_exec_error() {
        let mut conn = connect(DriverOptions::default().autocommit(false));
        conn.backend_mut().prepare_error =
            Some(ErrorFields::local("42P18", "could not determine data type"));
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE id = $1", eager())
            .unwrap();
        stmt.bind(1, 1).unwrap();

        let err = stmt.execute(&mut conn).await.unwrap_err();
        assert!(matches!(err, DriverError::Exec { ref sqlstate, .. } if sqlstate == "42P18"));
        assert_eq!(stmt.state(), ExecState::Errored);
    }

    #[tokio::test]
    async fn test_close_deallocates() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE id = $1", eager())
            .unwrap();
        stmt.bind(1, 1).unwrap();
        stmt.execute(&mut conn).await.unwrap();
        stmt.close(&mut conn).await.unwrap();
        assert_eq!(conn.backend().deallocates(), 1);
    }
}

// ============================================================================
// Results and fetch
// ============================================================================

mod results {
    use super::*;

    #[tokio::test]
    async fn test_fetch_until_exhausted() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT id, name FROM t", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(testing::tuples(
            &[("id", Oid::INT4), ("name", Oid::TEXT)],
            &[&[Some("1"), Some("a")], &[Some("2"), None]],
        ));

        assert_eq!(stmt.execute(&mut conn).await.unwrap(), Some(2));
        assert_eq!(stmt.state(), ExecState::ResultReady);
        assert_eq!(stmt.column_names(), vec!["id", "name"]);

        let rows = stmt.fetch_all(&mut conn).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(1), Some(&Value::Text("a".to_string())));
        assert_eq!(rows[1].get_by_name("name"), Some(&Value::Null));
        assert_eq!(stmt.state(), ExecState::Idle);
        assert!(stmt.fetch(&mut conn).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_before_execute_is_refused() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        let err = stmt.fetch(&mut conn).await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolState(_)));
    }

    #[tokio::test]
    async fn test_command_row_count() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("DELETE FROM t", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(RawResult::command("DELETE 4"));
        assert_eq!(stmt.execute(&mut conn).await.unwrap(), Some(4));
        assert_eq!(stmt.rows_affected(), Some(4));
        assert!(stmt.fetch(&mut conn).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_recorded() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT * FROM nope", StatementOptions::default())
            .unwrap();
        conn.backend_mut()
            .reply_one(testing::error("42P01", "relation \"nope\" does not exist"));

        let err = stmt.execute(&mut conn).await.unwrap_err();
        assert_eq!(err.sqlstate(), "42P01");
        assert_eq!(stmt.state(), ExecState::Errored);
        let last = conn.last_error().unwrap();
        assert_eq!(last.sqlstate, "42P01");
        assert_eq!(last.message, "relation \"nope\" does not exist");
    }

    #[tokio::test]
    async fn test_dropped_failed_statements_leave_nothing_behind() {
        let mut conn = conn();
        for _ in 0..50 {
            let mut stmt = conn
                .prepare("SELECT boom", StatementOptions::default())
                .unwrap();
            conn.backend_mut()
                .reply_one(testing::error("42703", "column \"boom\" does not exist"));
            assert!(stmt.execute(&mut conn).await.is_err());
            drop(stmt);
        }
        assert_eq!(conn.slot.parked_len(), 0);
    }

    #[tokio::test]
    async fn test_finish_discards_rows() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(one_row("1"));
        stmt.execute(&mut conn).await.unwrap();
        stmt.finish(&mut conn);
        assert_eq!(stmt.state(), ExecState::Idle);
        assert!(stmt.fetch(&mut conn).await.unwrap().is_none());
        assert_eq!(conn.result_owner(), None);
    }

    #[tokio::test]
    async fn test_non_standard_strings_use_escape_form() {
        let mut conn = connect(DriverOptions::default().server_prepare(false));
        conn.backend_mut()
            .set_parameter("standard_conforming_strings", "off");
        let mut stmt = conn
            .prepare("SELECT * FROM t WHERE path = ?", StatementOptions::default())
            .unwrap();
        stmt.bind(1, "C:\\temp").unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(
            conn.backend().queries(),
            vec!["SELECT * FROM t WHERE path = E'C:\\\\temp'"]
        );
    }
}

// ============================================================================
// Transactions
// ============================================================================

mod transactions {
    use super::*;

    #[tokio::test]
    async fn test_implicit_begin_outside_autocommit() {
        let mut conn = connect(DriverOptions::default().autocommit(false).read_only(true));
        let mut stmt = conn
            .prepare("UPDATE t SET x = 1", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(RawResult::command("UPDATE 3"));
        assert_eq!(stmt.execute(&mut conn).await.unwrap(), Some(3));
        stmt.execute(&mut conn).await.unwrap();

        assert_eq!(
            conn.backend().queries(),
            vec![
                "BEGIN",
                "SET TRANSACTION READ ONLY",
                "UPDATE t SET x = 1",
                "UPDATE t SET x = 1"
            ]
        );
        conn.commit().await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
        assert_eq!(conn.backend().queries().last(), Some(&"COMMIT"));
    }

    #[tokio::test]
    async fn test_autocommit_never_begins() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("UPDATE t SET x = 1", StatementOptions::default())
            .unwrap();
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(conn.backend().queries(), vec!["UPDATE t SET x = 1"]);
    }

    #[tokio::test]
    async fn test_savepoint_stack() {
        let mut conn = connect(DriverOptions::default().autocommit(false));
        conn.savepoint("a").await.unwrap();
        conn.savepoint("b").await.unwrap();
        conn.savepoint("c").await.unwrap();
        conn.rollback_to("b").await.unwrap();
        assert_eq!(conn.savepoints(), &["a".to_string(), "b".to_string()]);
        conn.release("a").await.unwrap();
        assert!(conn.savepoints().is_empty());

        let err = conn.release("zzz").await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolState(_)));
        conn.rollback().await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    }

    #[tokio::test]
    async fn test_savepoint_needs_transaction_in_autocommit() {
        let mut conn = conn();
        let err = conn.savepoint("a").await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolState(_)));
        assert!(conn.backend().calls.is_empty());
    }
}

// ============================================================================
// COPY
// ============================================================================

mod copy {
    use super::*;

    #[tokio::test]
    async fn test_copy_in_blocks_other_statements() {
        let mut conn = conn();
        let mut copy = conn
            .prepare("COPY t FROM STDIN", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(testing::copy_in());
        assert_eq!(copy.execute(&mut conn).await.unwrap(), None);
        assert_eq!(copy.state(), ExecState::InCopy);
        assert_eq!(conn.copy_mode(), CopyMode::In);

        let mut other = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        let calls_before = conn.backend().calls.len();
        let err = other.execute(&mut conn).await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolState(_)));
        assert_eq!(conn.backend().calls.len(), calls_before);

        conn.put_copy_data(b"1\tone\n").await.unwrap();
        conn.put_copy_data("2\ttwo\n").await.unwrap();
        assert_eq!(conn.put_copy_end().await.unwrap(), Some(2));
        assert_eq!(conn.copy_mode(), CopyMode::None);

        assert!(copy.fetch(&mut conn).await.unwrap().is_none());
        assert_eq!(copy.state(), ExecState::Idle);
        assert_eq!(copy.rows_affected(), Some(2));
        assert!(other.execute(&mut conn).await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_out_chunks() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("COPY t TO STDOUT", StatementOptions::default())
            .unwrap();
        conn.backend_mut()
            .reply_one(testing::copy_out(Format::Text))
            .copy_out_data(&[b"1\tone\n", b"2\ttwo\n"]);
        stmt.execute(&mut conn).await.unwrap();
        assert_eq!(conn.copy_mode(), CopyMode::Out);

        let first = conn.get_copy_data().await.unwrap().unwrap();
        assert_eq!(&first.data[..], b"1\tone\n");
        assert_eq!(first.format, Format::Text);
        assert!(conn.get_copy_data().await.unwrap().is_some());
        assert!(conn.get_copy_data().await.unwrap().is_none());
        assert_eq!(conn.copy_mode(), CopyMode::None);
    }

    #[tokio::test]
    async fn test_copy_calls_outside_copy_mode() {
        let mut conn = conn();
        let err = conn.put_copy_data(b"x").await.unwrap_err();
        assert!(matches!(err, DriverError::Copy(_)));
        let err = conn.get_copy_data().await.unwrap_err();
        assert!(matches!(err, DriverError::Copy(_)));
        let err = conn.put_copy_end().await.unwrap_err();
        assert!(matches!(err, DriverError::Copy(_)));
        assert!(conn.backend().calls.is_empty());
    }

    #[tokio::test]
    async fn test_copy_fail() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("COPY t FROM STDIN", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(testing::copy_in());
        stmt.execute(&mut conn).await.unwrap();

        conn.put_copy_fail("bad input").await.unwrap();
        assert_eq!(conn.copy_mode(), CopyMode::None);
        assert_eq!(conn.last_error().unwrap().sqlstate, "57014");
        assert!(conn
            .backend()
            .calls
            .contains(&Call::CopyEnd(Some("bad input".to_string()))));
    }
}

// ============================================================================
// Asynchronous execution
// ============================================================================

mod async_exec {
    use super::*;

    #[tokio::test]
    async fn test_poll_wait_and_fetch() {
        let mut conn = conn();
        conn.backend_mut().busy_polls = 1;
        let mut stmt = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(one_row("1"));

        stmt.execute_async(&mut conn).await.unwrap();
        assert_eq!(conn.async_status(), AsyncStatus::Pending);
        assert_eq!(conn.poll_async().await.unwrap(), AsyncPoll::Pending);
        assert_eq!(conn.poll_async().await.unwrap(), AsyncPoll::Ready);
        assert_eq!(conn.wait_async().await.unwrap(), Some(1));
        assert_eq!(conn.poll_async().await.unwrap(), AsyncPoll::Idle);

        let row = stmt.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_fetch_waits_for_own_async_result() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(one_row("5"));
        stmt.execute_async(&mut conn).await.unwrap();

        let row = stmt.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(5)));
        assert_eq!(conn.async_status(), AsyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_pending_query_blocks_without_policy() {
        let mut conn = conn();
        let mut first = conn
            .prepare("SELECT pg_sleep(1)", StatementOptions::default())
            .unwrap();
        first.execute_async(&mut conn).await.unwrap();

        let mut second = conn
            .prepare("SELECT 2", StatementOptions::default())
            .unwrap();
        let err = second.execute(&mut conn).await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolState(_)));
    }

    #[tokio::test]
    async fn test_wait_policy_keeps_old_result_for_its_statement() {
        let mut conn = conn();
        let mut first = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(one_row("1"));
        first.execute_async(&mut conn).await.unwrap();

        let mut second = conn
            .prepare(
                "SELECT 2",
                StatementOptions::default().old_query(OldQueryPolicy::Wait),
            )
            .unwrap();
        conn.backend_mut().reply_one(one_row("2"));
        second.execute(&mut conn).await.unwrap();

        let row = second.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(2)));
        let row = first.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_cancel_policy() {
        let mut conn = conn();
        let mut first = conn
            .prepare("SELECT pg_sleep(10)", StatementOptions::default())
            .unwrap();
        first.execute_async(&mut conn).await.unwrap();

        let mut second = conn
            .prepare(
                "SELECT 2",
                StatementOptions::default().old_query(OldQueryPolicy::Cancel),
            )
            .unwrap();
        second.execute(&mut conn).await.unwrap();
        assert!(conn.backend().calls.contains(&Call::Cancel));
        assert!(first.fetch(&mut conn).await.unwrap().is_none());
        assert_eq!(first.async_status(), AsyncStatus::Cancelled);
        assert_eq!(second.async_status(), AsyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_statement_cancel_marks_issuer() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("SELECT pg_sleep(10)", StatementOptions::default())
            .unwrap();
        assert_eq!(stmt.async_status(), AsyncStatus::Idle);
        stmt.execute_async(&mut conn).await.unwrap();
        assert_eq!(stmt.async_status(), AsyncStatus::Pending);

        let mut other = conn
            .prepare("SELECT 2", StatementOptions::default())
            .unwrap();
        let err = other.cancel(&mut conn).await.unwrap_err();
        assert!(matches!(err, DriverError::Cancel(CancelError::NothingPending)));
        assert_eq!(conn.async_status(), AsyncStatus::Pending);

        stmt.cancel(&mut conn).await.unwrap();
        assert_eq!(stmt.async_status(), AsyncStatus::Cancelled);
        assert_eq!(stmt.state(), ExecState::Idle);
        assert!(stmt.fetch(&mut conn).await.unwrap().is_none());
        assert_eq!(stmt.async_status(), AsyncStatus::Cancelled);

        // A new asynchronous run clears the mark
        conn.backend_mut().reply_one(one_row("1"));
        stmt.execute_async(&mut conn).await.unwrap();
        let row = stmt.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(stmt.async_status(), AsyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_cancel_confirmed_rolls_back() {
        let mut conn = connect(DriverOptions::default().autocommit(false));
        let mut stmt = conn
            .prepare("SELECT pg_sleep(10)", StatementOptions::default())
            .unwrap();
        stmt.execute_async(&mut conn).await.unwrap();
        assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);

        conn.cancel_async().await.unwrap();
        assert_eq!(conn.async_status(), AsyncStatus::Cancelled);
        assert_eq!(conn.last_error().unwrap().sqlstate, "57014");
        assert_eq!(conn.backend().queries().last(), Some(&"ROLLBACK"));
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_reports_not_cancelled() {
        let mut conn = conn();
        conn.backend_mut().cancel_effective = false;
        let mut stmt = conn
            .prepare("SELECT 1", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(one_row("1"));
        stmt.execute_async(&mut conn).await.unwrap();

        let err = conn.cancel_async().await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Cancel(CancelError::AlreadyFinished)
        ));
        assert_eq!(conn.async_status(), AsyncStatus::Idle);
        // The finished query's rows are still there
        let row = stmt.fetch(&mut conn).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_cancel_without_pending_query() {
        let mut conn = conn();
        let err = conn.cancel_async().await.unwrap_err();
        assert!(matches!(err, DriverError::Cancel(CancelError::NothingPending)));
        assert!(conn.backend().calls.is_empty());
    }

    #[tokio::test]
    async fn test_async_copy_in_is_ended() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("COPY t FROM STDIN", StatementOptions::default())
            .unwrap();
        conn.backend_mut().reply_one(testing::copy_in());
        stmt.execute_async(&mut conn).await.unwrap();

        assert_eq!(conn.wait_async().await.unwrap(), Some(0));
        assert!(conn.backend().calls.contains(&Call::CopyEnd(None)));
        assert_eq!(conn.copy_mode(), CopyMode::None);
    }

    #[tokio::test]
    async fn test_async_copy_out_needs_explicit_read() {
        let mut conn = conn();
        let mut stmt = conn
            .prepare("COPY t TO STDOUT", StatementOptions::default())
            .unwrap();
        conn.backend_mut()
            .reply_one(testing::copy_out(Format::Binary))
            .copy_out_data(&[b"PGCOPY"]);
        stmt.execute_async(&mut conn).await.unwrap();

        let err = conn.wait_async().await.unwrap_err();
        assert!(matches!(err, DriverError::Copy(_)));
        assert_eq!(conn.copy_mode(), CopyMode::Out);
        let chunk = conn.get_copy_data().await.unwrap().unwrap();
        assert_eq!(chunk.format, Format::Binary);
        assert!(conn.get_copy_data().await.unwrap().is_none());
    }
}
