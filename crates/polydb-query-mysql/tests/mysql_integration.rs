use polydb_query::{
    BackendKind, ConnectionConfig, DataError, DataSource, ExecStatus, KeyRole,
    TransactionOutcome,
};
use polydb_query_mysql::MySqlSource;
use serde_json::json;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};

async fn start_mysql() -> anyhow::Result<(ContainerAsync<GenericImage>, MySqlSource)> {
    let container = GenericImage::new("mysql", "8.0")
        .with_env_var("MYSQL_ROOT_PASSWORD", "secret")
        .with_env_var("MYSQL_DATABASE", "app")
        .start()
        .await?;

    let port = container.get_host_port_ipv4(3306).await?;

    let config = ConnectionConfig::new(BackendKind::MySql)
        .with_host("127.0.0.1")
        .with_port(port)
        .with_user("root")
        .with_password("secret")
        .with_database("app");

    // MySQL restarts once during first-boot initialization
    let mut retries = 30;
    loop {
        let mut source = MySqlSource::new(config.clone())?;
        match source.connect().await {
            Ok(()) => return Ok((container, source)),
            Err(e) if retries > 0 => {
                retries -= 1;
                println!("MySQL not ready ({}), retrying in 2s", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_execute_fetch_and_schema() -> anyhow::Result<()> {
    let (_container, mut source) = start_mysql().await?;

    let status = source
        .execute(
            "CREATE TABLE t (id INT PRIMARY KEY AUTO_INCREMENT, email VARCHAR(64) UNIQUE, note TEXT);
             -- seed
             INSERT INTO t (email, note) VALUES ('a@example.com', NULL);",
        )
        .await?;
    assert_eq!(status, ExecStatus::Success);

    let columns = source.schema().unwrap().columns("t").unwrap();
    assert!(columns[0].is_primary_key());
    assert_eq!(columns[0].extra, "auto_increment");
    assert_eq!(columns[1].key, KeyRole::Unique);
    assert!(columns[2].nullable);

    let rows = source.fetch("SELECT id, email, note FROM t").await?;
    assert_eq!(rows, vec![json!([1, "a@example.com", null])]);
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_autocommit_off_until_commit() -> anyhow::Result<()> {
    let (_container, mut source) = start_mysql().await?;

    source.execute("CREATE TABLE t (id INT)").await?;
    source.execute("INSERT INTO t VALUES (1)").await?;
    assert_eq!(source.rollback().await?, TransactionOutcome::RolledBack);
    assert!(source.fetch("SELECT id FROM t").await?.is_empty());

    source.execute("INSERT INTO t VALUES (2)").await?;
    assert_eq!(source.commit().await?, TransactionOutcome::Committed);
    source.close().await?;

    assert_eq!(source.fetch("SELECT id FROM t").await?, vec![json!([2])]);
    assert_eq!(source.execute("SELEC 2").await?, ExecStatus::Failure);
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_fetch_runs_exactly_one_statement() -> anyhow::Result<()> {
    let (_container, mut source) = start_mysql().await?;

    assert!(matches!(
        source.try_fetch("SELECT 1; SELECT 2").await,
        Err(DataError::InvalidQuery(_))
    ));
    assert!(source.fetch("-- nothing").await?.is_empty());
    assert_eq!(source.fetch("SELECT 1;").await?, vec![json!([1])]);
    Ok(())
}
