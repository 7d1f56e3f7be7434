//! MySQL statement templates.
//!
//! Identifiers are backtick-quoted and literals escaped the way the MySQL client
//! libraries do it. WHERE fragments passed to update/delete are trusted verbatim.

use serde_json::{Map, Value};

/// Builds the fixed SQL used by introspection, data editing and import/export.
pub struct MySqlDialect;

impl MySqlDialect {
    /// Quotes an identifier with backticks, doubling embedded backticks.
    pub fn escape_id(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// `` `db`.`table` ``
    pub fn qualified(database: &str, table: &str) -> String {
        format!("{}.{}", Self::escape_id(database), Self::escape_id(table))
    }

    /// Renders a JSON value as a SQL literal.
    pub fn escape_value(value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => Self::escape_string(s),
            Value::Array(items) => items
                .iter()
                .map(Self::escape_value)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => Self::escape_string(&value.to_string()),
        }
    }

    /// Single-quoted string literal with backslash escapes.
    pub fn escape_string(s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('\'');
        for c in s.chars() {
            match c {
                '\0' => out.push_str("\\0"),
                '\x08' => out.push_str("\\b"),
                '\t' => out.push_str("\\t"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\x1a' => out.push_str("\\Z"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    pub fn show_databases() -> &'static str {
        "SHOW DATABASES"
    }

    pub fn show_tables(database: &str) -> String {
        format!("SHOW TABLES FROM {}", Self::escape_id(database))
    }

    pub fn show_table_status(database: &str) -> String {
        format!("SHOW TABLE STATUS FROM {}", Self::escape_id(database))
    }

    pub fn show_views(database: &str) -> String {
        format!(
            "SHOW FULL TABLES IN {} WHERE TABLE_TYPE LIKE 'VIEW'",
            Self::escape_id(database)
        )
    }

    /// Routine names of one kind (`FUNCTION` or `PROCEDURE`); binds the schema as `?`.
    pub fn list_routines(kind: RoutineKind) -> &'static str {
        match kind {
            RoutineKind::Function => {
                "SELECT ROUTINE_NAME AS Name FROM information_schema.ROUTINES \
                 WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = 'FUNCTION' ORDER BY ROUTINE_NAME"
            }
            RoutineKind::Procedure => {
                "SELECT ROUTINE_NAME AS Name FROM information_schema.ROUTINES \
                 WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = 'PROCEDURE' ORDER BY ROUTINE_NAME"
            }
        }
    }

    pub fn describe_table(database: &str, table: &str) -> String {
        format!("DESCRIBE {}", Self::qualified(database, table))
    }

    pub fn show_create_table(database: &str, table: &str) -> String {
        format!("SHOW CREATE TABLE {}", Self::qualified(database, table))
    }

    pub fn select_data(database: &str, table: &str, limit: u64, offset: u64) -> String {
        format!(
            "SELECT * FROM {} LIMIT {} OFFSET {}",
            Self::qualified(database, table),
            limit,
            offset
        )
    }

    pub fn select_limited(database: &str, table: &str, limit: u64) -> String {
        format!("SELECT * FROM {} LIMIT {}", Self::qualified(database, table), limit)
    }

    pub fn count_data(database: &str, table: &str) -> String {
        format!("SELECT COUNT(*) AS total FROM {}", Self::qualified(database, table))
    }

    /// INSERT from a column → value mapping.
    pub fn insert_data(database: &str, table: &str, data: &Map<String, Value>) -> String {
        let columns = data.keys().map(|c| Self::escape_id(c)).collect::<Vec<_>>();
        let values = data.values().cloned().collect::<Vec<_>>();
        Self::insert_values(database, table, Some(&columns), &values)
    }

    /// INSERT with pre-escaped column names; no column list when `columns` is `None`.
    pub fn insert_values(
        database: &str,
        table: &str,
        columns: Option<&[String]>,
        values: &[Value],
    ) -> String {
        let values = values
            .iter()
            .map(Self::escape_value)
            .collect::<Vec<_>>()
            .join(", ");
        match columns {
            Some(columns) => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                Self::qualified(database, table),
                columns.join(", "),
                values
            ),
            None => format!("INSERT INTO {} VALUES ({})", Self::qualified(database, table), values),
        }
    }

    pub fn update_data(
        database: &str,
        table: &str,
        data: &Map<String, Value>,
        where_clause: &str,
    ) -> String {
        let sets = data
            .iter()
            .map(|(col, val)| format!("{} = {}", Self::escape_id(col), Self::escape_value(val)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {}",
            Self::qualified(database, table),
            sets,
            where_clause
        )
    }

    pub fn delete_data(database: &str, table: &str, where_clause: &str) -> String {
        format!("DELETE FROM {} WHERE {}", Self::qualified(database, table), where_clause)
    }

    pub fn use_schema(database: &str) -> String {
        format!("USE {}", Self::escape_id(database))
    }

    pub fn show_global_status() -> &'static str {
        "SHOW GLOBAL STATUS"
    }

    pub fn show_global_variables() -> &'static str {
        "SHOW GLOBAL VARIABLES"
    }

    pub fn performance_schema_flag() -> &'static str {
        "SHOW VARIABLES LIKE 'performance_schema'"
    }

    /// Ten largest tables of a schema (bound with `?`).
    pub fn largest_tables() -> &'static str {
        "SELECT TABLE_NAME AS name, TABLE_ROWS AS table_rows, \
         DATA_LENGTH AS data_length, INDEX_LENGTH AS index_length \
         FROM information_schema.TABLES WHERE TABLE_SCHEMA = ? \
         ORDER BY (DATA_LENGTH + INDEX_LENGTH) DESC LIMIT 10"
    }

    pub fn lock_waits() -> &'static str {
        "SELECT r.trx_id AS waiting_trx_id, r.trx_mysql_thread_id AS waiting_thread, \
         r.trx_query AS waiting_query, b.trx_id AS blocking_trx_id, \
         b.trx_mysql_thread_id AS blocking_thread, b.trx_query AS blocking_query, \
         dl.OBJECT_SCHEMA, dl.OBJECT_NAME, dl.INDEX_NAME, dl.LOCK_TYPE, dl.LOCK_MODE, dl.LOCK_STATUS \
         FROM performance_schema.data_lock_waits w \
         JOIN information_schema.INNODB_TRX r ON w.REQUESTING_ENGINE_TRANSACTION_ID = r.trx_id \
         JOIN information_schema.INNODB_TRX b ON w.BLOCKING_ENGINE_TRANSACTION_ID = b.trx_id \
         JOIN performance_schema.data_locks dl ON w.REQUESTING_ENGINE_LOCK_ID = dl.ENGINE_LOCK_ID"
    }

    pub fn all_locks() -> &'static str {
        "SELECT * FROM performance_schema.data_locks"
    }

    /// Top 20 statement digests by total latency.
    pub fn statement_digests() -> &'static str {
        "SELECT DIGEST, DIGEST_TEXT, COUNT_STAR, SUM_TIMER_WAIT, AVG_TIMER_WAIT, \
         SUM_ROWS_SENT, SUM_ROWS_EXAMINED \
         FROM performance_schema.events_statements_summary_by_digest \
         ORDER BY SUM_TIMER_WAIT DESC LIMIT 20"
    }

    /// Splits a script on every `;`.
    ///
    /// Semicolons inside string literals, comments or procedure bodies are not
    /// recognized; such scripts must be executed statement by statement.
    pub fn split_statements(script: &str) -> Vec<&str> {
        script
            .split(';')
            .map(str::trim)
            .filter(|stmt| !stmt.is_empty())
            .collect()
    }

    /// Rewrites a `SHOW CREATE TABLE` result so it can be replayed safely.
    pub fn create_if_not_exists(create_sql: &str) -> String {
        match create_sql.strip_prefix("CREATE TABLE ") {
            Some(rest) if !rest.starts_with("IF NOT EXISTS") => {
                format!("CREATE TABLE IF NOT EXISTS {}", rest)
            }
            _ => create_sql.to_string(),
        }
    }
}

/// Stored-routine kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_id_doubles_backticks() {
        assert_eq!(MySqlDialect::escape_id("users"), "`users`");
        assert_eq!(MySqlDialect::escape_id("we`ird"), "`we``ird`");
        assert_eq!(MySqlDialect::escape_id("a.b"), "`a.b`");
    }

    #[test]
    fn test_escape_value() {
        assert_eq!(MySqlDialect::escape_value(&json!(null)), "NULL");
        assert_eq!(MySqlDialect::escape_value(&json!(42)), "42");
        assert_eq!(MySqlDialect::escape_value(&json!(true)), "true");
        assert_eq!(MySqlDialect::escape_value(&json!("O'Brien")), "'O\\'Brien'");
        assert_eq!(MySqlDialect::escape_value(&json!("a\\b\n")), "'a\\\\b\\n'");
        assert_eq!(MySqlDialect::escape_value(&json!([1, "x"])), "1, 'x'");
    }

    #[test]
    fn test_insert_keeps_column_order() {
        let data = json!({ "name": "bob", "age": 30 });
        let sql = MySqlDialect::insert_data("shop", "users", data.as_object().unwrap());
        assert_eq!(
            sql,
            "INSERT INTO `shop`.`users` (`name`, `age`) VALUES ('bob', 30)"
        );
    }

    #[test]
    fn test_insert_without_columns() {
        let sql = MySqlDialect::insert_values("shop", "users", None, &[json!("1"), Value::Null]);
        assert_eq!(sql, "INSERT INTO `shop`.`users` VALUES ('1', NULL)");
    }

    #[test]
    fn test_update_and_delete_use_where_verbatim() {
        let data = json!({ "name": "amy" });
        assert_eq!(
            MySqlDialect::update_data("shop", "users", data.as_object().unwrap(), "id = 7"),
            "UPDATE `shop`.`users` SET `name` = 'amy' WHERE id = 7"
        );
        assert_eq!(
            MySqlDialect::delete_data("shop", "users", "id IN (1,2)"),
            "DELETE FROM `shop`.`users` WHERE id IN (1,2)"
        );
    }

    #[test]
    fn test_select_and_count_templates() {
        assert_eq!(
            MySqlDialect::select_data("shop", "orders", 100, 200),
            "SELECT * FROM `shop`.`orders` LIMIT 100 OFFSET 200"
        );
        assert_eq!(
            MySqlDialect::count_data("shop", "orders"),
            "SELECT COUNT(*) AS total FROM `shop`.`orders`"
        );
    }

    #[test]
    fn test_split_statements_on_semicolons() {
        let script = "CREATE TABLE a (id INT);\n\n INSERT INTO a VALUES (1);;\n-- done\n";
        assert_eq!(
            MySqlDialect::split_statements(script),
            vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)", "-- done"]
        );
    }

    #[test]
    fn test_split_statements_breaks_quoted_semicolon() {
        // Documented limitation: a ';' inside a literal still splits.
        assert_eq!(
            MySqlDialect::split_statements("INSERT INTO t VALUES ('a;b')").len(),
            2
        );
    }

    #[test]
    fn test_create_if_not_exists() {
        assert_eq!(
            MySqlDialect::create_if_not_exists("CREATE TABLE `t` (\n  `id` int\n)"),
            "CREATE TABLE IF NOT EXISTS `t` (\n  `id` int\n)"
        );
        assert_eq!(
            MySqlDialect::create_if_not_exists("CREATE TABLE IF NOT EXISTS `t` (x int)"),
            "CREATE TABLE IF NOT EXISTS `t` (x int)"
        );
    }
}
