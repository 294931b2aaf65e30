//! `rusqlite`-backed [`Catalog`] implementation.
//!
//! The connection is owned by a single background task, never shared
//! directly — matching how the teacher keeps `VaultLockManager` the sole
//! arbiter of concurrent file access (spec.md §5, SPEC_FULL §5) instead of
//! passing a raw handle around. Callers talk to it over an `mpsc` command
//! channel; each command carries a `oneshot` reply sender.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};

use super::{Catalog, CatalogError, InvariantViolation};
use crate::model::{Block, File, Key, Storage, StorageKind, StorageToken};

type Reply<T> = oneshot::Sender<Result<T, CatalogError>>;

enum Command {
    CreateStorage { token: StorageToken, kind: StorageKind, total_bytes: u64, reply: Reply<Storage> },
    ListStorages { reply: Reply<Vec<Storage>> },
    GetStorage { id: i64, reply: Reply<Storage> },
    DeleteStorage { id: i64, reply: Reply<()> },
    RefreshCapacity { id: i64, used_bytes: u64, total_bytes: u64, reply: Reply<()> },
    CreateKey { material: String, reply: Reply<Key> },
    ListKeys { reply: Reply<Vec<Key>> },
    GetKey { id: i64, reply: Reply<Key> },
    CreateFile {
        filename: String,
        size: u64,
        total_blocks: u32,
        checksum: String,
        block_size: u32,
        duplicate_count: u32,
        encrypted: bool,
        reply: Reply<File>,
    },
    GetFileByName { filename: String, reply: Reply<File> },
    ListFiles { reply: Reply<Vec<File>> },
    DeleteFile { id: i64, reply: Reply<()> },
    AddBlock {
        file_id: i64,
        number: u32,
        duplicate_number: u32,
        name: String,
        size: u64,
        storage_id: i64,
        key_id: Option<i64>,
        reply: Reply<Block>,
    },
    GetBlocksByFile { file_id: i64, reply: Reply<Vec<Block>> },
    GetBlocksGroupedByNumber { file_id: i64, reply: Reply<Vec<Vec<Block>>> },
    DeleteBlock { id: i64, reply: Reply<()> },
    VerifyInvariants { reply: Reply<Vec<InvariantViolation>> },
}

/// Handle to a running catalog actor task. Cloning shares the same
/// underlying connection; the task exits once every handle is dropped.
#[derive(Clone)]
pub struct SqliteCatalog {
    tx: mpsc::Sender<Command>,
}

impl SqliteCatalog {
    /// Open (creating if absent) the catalog database at `path`, run
    /// migrations, and spawn its owning task. Only returns once the schema
    /// exists — never a partially-initialized handle (SPEC_FULL §4.6).
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(64);

        std::thread::spawn(move || {
            let conn = match Connection::open(&path).and_then(|c| {
                migrate(&c)?;
                Ok(c)
            }) {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = ready_tx.send(Err(CatalogError::Sql(e)));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            run_actor(conn, rx);
        });

        ready_rx.await.map_err(|_| CatalogError::ActorGone)??;
        Ok(Self { tx })
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CatalogError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| CatalogError::ActorGone)?;
        reply_rx.await.map_err(|_| CatalogError::ActorGone)?
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS storage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            used_bytes INTEGER NOT NULL DEFAULT 0,
            total_bytes INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS key (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            material TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL UNIQUE,
            size INTEGER NOT NULL,
            total_blocks INTEGER NOT NULL,
            uploaded_blocks INTEGER NOT NULL DEFAULT 0,
            checksum TEXT NOT NULL,
            block_size INTEGER NOT NULL,
            duplicate_count INTEGER NOT NULL,
            encrypted INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS block (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES file(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            duplicate_number INTEGER NOT NULL,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            storage_id INTEGER NOT NULL REFERENCES storage(id),
            key_id INTEGER REFERENCES key(id),
            UNIQUE (file_id, number, duplicate_number)
        );
        ",
    )
}

/// True if `err` is a SQLite `UNIQUE`/primary-key constraint violation,
/// as opposed to any other SQL failure.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error { code: rusqlite::ErrorCode::ConstraintViolation, .. },
            _
        )
    )
}

fn run_actor(conn: Connection, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.blocking_recv() {
        if let Err(e) = handle(&conn, cmd) {
            warn!(error = %e, "catalog command reply channel dropped");
        }
    }
}

fn handle(conn: &Connection, cmd: Command) -> Result<(), CatalogError> {
    match cmd {
        Command::CreateStorage { token, kind, total_bytes, reply } => {
            let result = (|| {
                conn.execute(
                    "INSERT INTO storage (token, kind, used_bytes, total_bytes) VALUES (?1, ?2, 0, ?3)",
                    params![token.as_str(), kind.as_str(), total_bytes as i64],
                )?;
                let id = conn.last_insert_rowid();
                Ok(Storage { id, token, kind, used_bytes: 0, total_bytes })
            })();
            let _ = reply.send(result);
        }
        Command::ListStorages { reply } => {
            let result = (|| {
                let mut stmt = conn.prepare("SELECT id, token, kind, used_bytes, total_bytes FROM storage")?;
                let rows = stmt.query_map([], row_to_storage)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
            })();
            let _ = reply.send(result);
        }
        Command::GetStorage { id, reply } => {
            let result = conn
                .query_row(
                    "SELECT id, token, kind, used_bytes, total_bytes FROM storage WHERE id = ?1",
                    params![id],
                    row_to_storage,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => CatalogError::UnknownStorage(id),
                    other => CatalogError::Sql(other),
                });
            let _ = reply.send(result);
        }
        Command::DeleteStorage { id, reply } => {
            let result = (|| {
                let n = conn.execute("DELETE FROM storage WHERE id = ?1", params![id])?;
                if n == 0 {
                    return Err(CatalogError::UnknownStorage(id));
                }
                Ok(())
            })();
            let _ = reply.send(result);
        }
        Command::RefreshCapacity { id, used_bytes, total_bytes, reply } => {
            let result = (|| {
                let n = conn.execute(
                    "UPDATE storage SET used_bytes = ?2, total_bytes = ?3 WHERE id = ?1",
                    params![id, used_bytes as i64, total_bytes as i64],
                )?;
                if n == 0 {
                    return Err(CatalogError::UnknownStorage(id));
                }
                Ok(())
            })();
            let _ = reply.send(result);
        }
        Command::CreateKey { material, reply } => {
            let result = (|| {
                conn.execute("INSERT INTO key (material) VALUES (?1)", params![material])
                    .map_err(|e| if is_unique_violation(&e) { CatalogError::KeyAlreadyExists } else { CatalogError::Sql(e) })?;
                let id = conn.last_insert_rowid();
                Ok(Key { id, material })
            })();
            let _ = reply.send(result);
        }
        Command::ListKeys { reply } => {
            let result = (|| {
                let mut stmt = conn.prepare("SELECT id, material FROM key")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Key { id: row.get(0)?, material: row.get(1)? })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
            })();
            let _ = reply.send(result);
        }
        Command::GetKey { id, reply } => {
            let result = conn
                .query_row("SELECT id, material FROM key WHERE id = ?1", params![id], |row| {
                    Ok(Key { id: row.get(0)?, material: row.get(1)? })
                })
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => CatalogError::UnknownKey(id),
                    other => CatalogError::Sql(other),
                });
            let _ = reply.send(result);
        }
        Command::CreateFile {
            filename,
            size,
            total_blocks,
            checksum,
            block_size,
            duplicate_count,
            encrypted,
            reply,
        } => {
            let result = (|| {
                conn.execute(
                    "INSERT INTO file (filename, size, total_blocks, uploaded_blocks, checksum, block_size, duplicate_count, encrypted)
                     VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7)",
                    params![
                        filename,
                        size as i64,
                        total_blocks,
                        checksum,
                        block_size,
                        duplicate_count,
                        encrypted as i64
                    ],
                )
                .map_err(|e| if is_unique_violation(&e) { CatalogError::FileAlreadyExists(filename.clone()) } else { CatalogError::Sql(e) })?;
                let id = conn.last_insert_rowid();
                Ok(File {
                    id,
                    filename,
                    size,
                    total_blocks,
                    uploaded_blocks: 0,
                    checksum,
                    block_size,
                    duplicate_count,
                    encrypted,
                })
            })();
            let _ = reply.send(result);
        }
        Command::GetFileByName { filename, reply } => {
            let result = conn
                .query_row(
                    "SELECT id, filename, size, total_blocks, uploaded_blocks, checksum, block_size, duplicate_count, encrypted
                     FROM file WHERE filename = ?1",
                    params![filename],
                    row_to_file,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => CatalogError::UnknownFileName(filename.clone()),
                    other => CatalogError::Sql(other),
                });
            let _ = reply.send(result);
        }
        Command::ListFiles { reply } => {
            let result = (|| {
                let mut stmt = conn.prepare(
                    "SELECT id, filename, size, total_blocks, uploaded_blocks, checksum, block_size, duplicate_count, encrypted FROM file",
                )?;
                let rows = stmt.query_map([], row_to_file)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
            })();
            let _ = reply.send(result);
        }
        Command::DeleteFile { id, reply } => {
            let result = (|| {
                let n = conn.execute("DELETE FROM file WHERE id = ?1", params![id])?;
                if n == 0 {
                    return Err(CatalogError::UnknownFile(id));
                }
                Ok(())
            })();
            let _ = reply.send(result);
        }
        Command::AddBlock { file_id, number, duplicate_number, name, size, storage_id, key_id, reply } => {
            let result = (|| {
                conn.execute(
                    "INSERT INTO block (file_id, number, duplicate_number, name, size, storage_id, key_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![file_id, number, duplicate_number, name, size as i64, storage_id, key_id],
                )?;
                let id = conn.last_insert_rowid();

                if duplicate_number == 0 {
                    conn.execute(
                        "UPDATE file SET uploaded_blocks = uploaded_blocks + 1 WHERE id = ?1",
                        params![file_id],
                    )?;
                }

                Ok(Block { id, file_id, number, duplicate_number, name, size, storage_id, key_id })
            })();
            let _ = reply.send(result);
        }
        Command::GetBlocksByFile { file_id, reply } => {
            let result = (|| {
                let mut stmt = conn.prepare(
                    "SELECT id, file_id, number, duplicate_number, name, size, storage_id, key_id
                     FROM block WHERE file_id = ?1",
                )?;
                let rows = stmt.query_map(params![file_id], row_to_block)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
            })();
            let _ = reply.send(result);
        }
        Command::GetBlocksGroupedByNumber { file_id, reply } => {
            let result = (|| {
                let total_blocks: u32 = conn
                    .query_row(
                        "SELECT total_blocks FROM file WHERE id = ?1",
                        params![file_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => CatalogError::UnknownFile(file_id),
                        other => CatalogError::Sql(other),
                    })?;

                let mut stmt = conn.prepare(
                    "SELECT id, file_id, number, duplicate_number, name, size, storage_id, key_id
                     FROM block WHERE file_id = ?1 ORDER BY number, duplicate_number",
                )?;
                let rows = stmt.query_map(params![file_id], row_to_block)?;
                let blocks = rows.collect::<rusqlite::Result<Vec<_>>>()?;

                // Dense, indexed by block number (spec.md §4.6: "the i-th
                // element is the non-empty list of replicas of block i").
                // A number with zero persisted replicas — e.g. left behind
                // by an interrupted upload — surfaces as an empty group at
                // its index rather than silently collapsing the gap.
                let mut groups: Vec<Vec<Block>> = vec![Vec::new(); total_blocks as usize];
                for block in blocks {
                    if let Some(group) = groups.get_mut(block.number as usize) {
                        group.push(block);
                    }
                }
                Ok(groups)
            })();
            let _ = reply.send(result);
        }
        Command::DeleteBlock { id, reply } => {
            let result = (|| {
                let n = conn.execute("DELETE FROM block WHERE id = ?1", params![id])?;
                if n == 0 {
                    return Err(CatalogError::Sql(rusqlite::Error::QueryReturnedNoRows));
                }
                Ok(())
            })();
            let _ = reply.send(result);
        }
        Command::VerifyInvariants { reply } => {
            let result = verify_invariants(conn);
            let _ = reply.send(result);
        }
    }
    Ok(())
}

fn verify_invariants(conn: &Connection) -> Result<Vec<InvariantViolation>, CatalogError> {
    let mut violations = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, filename, uploaded_blocks, total_blocks FROM file WHERE uploaded_blocks > total_blocks",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, u32>(2)?, row.get::<_, u32>(3)?))
    })?;
    for row in rows {
        let (id, filename, uploaded, total) = row?;
        violations.push(InvariantViolation(format!(
            "file {id} ({filename:?}) has uploaded_blocks {uploaded} > total_blocks {total}"
        )));
    }

    let mut stmt = conn.prepare(
        "SELECT file_id, number, storage_id, COUNT(*) FROM block GROUP BY file_id, number, storage_id HAVING COUNT(*) > 1",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?))
    })?;
    for row in rows {
        let (file_id, number, storage_id, count) = row?;
        violations.push(InvariantViolation(format!(
            "file {file_id} block {number} has {count} replicas on the same storage {storage_id}"
        )));
    }

    let mut stmt = conn.prepare(
        "SELECT block.id FROM block JOIN file ON file.id = block.file_id
         WHERE (file.encrypted = 0 AND block.key_id IS NOT NULL)
            OR (file.encrypted = 1 AND block.key_id IS NULL)",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    for row in rows {
        let block_id = row?;
        violations.push(InvariantViolation(format!(
            "block {block_id} has a key_id inconsistent with its file's encrypted flag"
        )));
    }

    Ok(violations)
}

fn row_to_storage(row: &rusqlite::Row<'_>) -> rusqlite::Result<Storage> {
    let kind_str: String = row.get(2)?;
    let kind = StorageKind::parse(&kind_str).unwrap_or(StorageKind::Memory);
    Ok(Storage {
        id: row.get(0)?,
        token: StorageToken::new(row.get::<_, String>(1)?),
        kind,
        used_bytes: row.get::<_, i64>(3)? as u64,
        total_bytes: row.get::<_, i64>(4)? as u64,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        filename: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        total_blocks: row.get(3)?,
        uploaded_blocks: row.get(4)?,
        checksum: row.get(5)?,
        block_size: row.get(6)?,
        duplicate_count: row.get(7)?,
        encrypted: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get(0)?,
        file_id: row.get(1)?,
        number: row.get(2)?,
        duplicate_number: row.get(3)?,
        name: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        storage_id: row.get(6)?,
        key_id: row.get(7)?,
    })
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn create_storage(
        &self,
        token: StorageToken,
        kind: StorageKind,
        total_bytes: u64,
    ) -> Result<Storage, CatalogError> {
        self.call(|reply| Command::CreateStorage { token, kind, total_bytes, reply }).await
    }

    async fn list_storages(&self) -> Result<Vec<Storage>, CatalogError> {
        self.call(|reply| Command::ListStorages { reply }).await
    }

    async fn get_storage(&self, id: i64) -> Result<Storage, CatalogError> {
        self.call(|reply| Command::GetStorage { id, reply }).await
    }

    async fn delete_storage(&self, id: i64) -> Result<(), CatalogError> {
        self.call(|reply| Command::DeleteStorage { id, reply }).await
    }

    async fn refresh_capacity(&self, id: i64, used_bytes: u64, total_bytes: u64) -> Result<(), CatalogError> {
        self.call(|reply| Command::RefreshCapacity { id, used_bytes, total_bytes, reply }).await
    }

    async fn create_key(&self, material: String) -> Result<Key, CatalogError> {
        self.call(|reply| Command::CreateKey { material, reply }).await
    }

    async fn list_keys(&self) -> Result<Vec<Key>, CatalogError> {
        self.call(|reply| Command::ListKeys { reply }).await
    }

    async fn get_key(&self, id: i64) -> Result<Key, CatalogError> {
        self.call(|reply| Command::GetKey { id, reply }).await
    }

    async fn create_file(
        &self,
        filename: String,
        size: u64,
        total_blocks: u32,
        checksum: String,
        block_size: u32,
        duplicate_count: u32,
        encrypted: bool,
    ) -> Result<File, CatalogError> {
        self.call(|reply| Command::CreateFile {
            filename,
            size,
            total_blocks,
            checksum,
            block_size,
            duplicate_count,
            encrypted,
            reply,
        })
        .await
    }

    async fn get_file_by_name(&self, filename: &str) -> Result<File, CatalogError> {
        let filename = filename.to_string();
        self.call(|reply| Command::GetFileByName { filename, reply }).await
    }

    async fn list_files(&self) -> Result<Vec<File>, CatalogError> {
        self.call(|reply| Command::ListFiles { reply }).await
    }

    async fn delete_file(&self, id: i64) -> Result<(), CatalogError> {
        self.call(|reply| Command::DeleteFile { id, reply }).await
    }

    async fn add_block(
        &self,
        file_id: i64,
        number: u32,
        duplicate_number: u32,
        name: String,
        size: u64,
        storage_id: i64,
        key_id: Option<i64>,
    ) -> Result<Block, CatalogError> {
        self.call(|reply| Command::AddBlock {
            file_id,
            number,
            duplicate_number,
            name,
            size,
            storage_id,
            key_id,
            reply,
        })
        .await
    }

    async fn get_blocks_by_file(&self, file_id: i64) -> Result<Vec<Block>, CatalogError> {
        self.call(|reply| Command::GetBlocksByFile { file_id, reply }).await
    }

    async fn get_blocks_grouped_by_number(&self, file_id: i64) -> Result<Vec<Vec<Block>>, CatalogError> {
        self.call(|reply| Command::GetBlocksGroupedByNumber { file_id, reply }).await
    }

    async fn delete_block(&self, id: i64) -> Result<(), CatalogError> {
        self.call(|reply| Command::DeleteBlock { id, reply }).await
    }

    async fn verify_invariants(&self) -> Result<Vec<InvariantViolation>, CatalogError> {
        self.call(|reply| Command::VerifyInvariants { reply }).await
    }
}
