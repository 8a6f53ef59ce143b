// ==========================================
// 数据迁移导入引擎 - 保存点
// ==========================================
// 批次事务内的单元级隔离: 出错时回滚到保存点，事务继续
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::Connection;

/// 建立保存点
pub fn begin(conn: &Connection, name: &str) -> RepositoryResult<()> {
    run(conn, &format!("SAVEPOINT {}", name))
}

/// 释放保存点（保留其中的写入）
pub fn release(conn: &Connection, name: &str) -> RepositoryResult<()> {
    run(conn, &format!("RELEASE SAVEPOINT {}", name))
}

/// 撤销保存点内的写入并释放
pub fn rollback_to(conn: &Connection, name: &str) -> RepositoryResult<()> {
    run(
        conn,
        &format!("ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}", name),
    )
}

fn run(conn: &Connection, sql: &str) -> RepositoryResult<()> {
    conn.execute_batch(sql)
        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_to_keeps_outer_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        let tx = conn.unchecked_transaction().unwrap();
        tx.execute("INSERT INTO t VALUES (1)", []).unwrap();

        begin(&tx, "unit").unwrap();
        tx.execute("INSERT INTO t VALUES (2)", []).unwrap();
        rollback_to(&tx, "unit").unwrap();

        begin(&tx, "unit").unwrap();
        tx.execute("INSERT INTO t VALUES (3)", []).unwrap();
        release(&tx, "unit").unwrap();
        tx.commit().unwrap();

        let values: Vec<i64> = conn
            .prepare("SELECT v FROM t ORDER BY v")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(values, vec![1, 3]);
    }
}
