use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scoring::ThreatLevel;

/// Work-order lifecycle. New tickets always start `Open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    Resolved,
    Dismissed,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Resolved => "resolved",
            WorkOrderStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Some(WorkOrderStatus::Open),
            "in_progress" => Some(WorkOrderStatus::InProgress),
            "resolved" => Some(WorkOrderStatus::Resolved),
            "dismissed" => Some(WorkOrderStatus::Dismissed),
            _ => None,
        }
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WO-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewWorkOrder {
    pub title: String,
    pub description: String,
    pub priority: ThreatLevel,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub evidence: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: TicketId,
    pub created_at: u64,
    pub title: String,
    pub description: String,
    pub priority: ThreatLevel,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub evidence: Option<String>,
    pub status: WorkOrderStatus,
}

pub trait WorkOrderStore {
    fn create(&mut self, order: &NewWorkOrder, created_at: u64) -> Result<TicketId>;

    fn get(&self, id: TicketId) -> Result<Option<WorkOrder>>;

    fn update_status(&mut self, id: TicketId, status: WorkOrderStatus) -> Result<()>;

    fn list(&self, status: Option<WorkOrderStatus>) -> Result<Vec<WorkOrder>>;
}

// -------------------- SQLite --------------------

pub struct SqliteWorkOrderStore {
    conn: Connection,
}

impl SqliteWorkOrderStore {
    /// `":memory:"` opens a private in-memory database.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| anyhow!("open work order db {}: {}", db_path, e))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS work_orders (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              title TEXT NOT NULL,
              description TEXT NOT NULL,
              priority TEXT NOT NULL,
              latitude REAL,
              longitude REAL,
              evidence_path TEXT,
              status TEXT NOT NULL DEFAULT 'open'
            );

            CREATE INDEX IF NOT EXISTS idx_work_orders_status ON work_orders(status);
            "#,
        )?;
        Ok(())
    }
}

type WorkOrderRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<f64>,
    Option<f64>,
    Option<String>,
    String,
);

const SELECT_COLUMNS: &str = "SELECT id, created_at, title, description, priority, latitude, \
     longitude, evidence_path, status FROM work_orders";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkOrderRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_row(row: WorkOrderRow) -> Result<WorkOrder> {
    let (id, created_at, title, description, priority, latitude, longitude, evidence, status) =
        row;
    Ok(WorkOrder {
        id: TicketId(id),
        created_at: u64::try_from(created_at)
            .map_err(|_| anyhow!("corrupt work order {}: negative created_at", id))?,
        title,
        description,
        priority: ThreatLevel::parse(&priority)
            .ok_or_else(|| anyhow!("corrupt work order {}: priority {}", id, priority))?,
        latitude,
        longitude,
        evidence,
        status: WorkOrderStatus::parse(&status)
            .ok_or_else(|| anyhow!("corrupt work order {}: status {}", id, status))?,
    })
}

impl WorkOrderStore for SqliteWorkOrderStore {
    fn create(&mut self, order: &NewWorkOrder, created_at: u64) -> Result<TicketId> {
        let created_at = i64::try_from(created_at)
            .map_err(|_| anyhow!("created_at exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO work_orders(created_at, title, description, priority, latitude, longitude, evidence_path, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                created_at,
                order.title,
                order.description,
                order.priority.as_str(),
                order.latitude,
                order.longitude,
                order.evidence,
                WorkOrderStatus::Open.as_str()
            ],
        )?;
        Ok(TicketId(self.conn.last_insert_rowid()))
    }

    fn get(&self, id: TicketId) -> Result<Option<WorkOrder>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        let row = stmt.query_row(params![id.0], read_row).optional()?;
        row.map(decode_row).transpose()
    }

    fn update_status(&mut self, id: TicketId, status: WorkOrderStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE work_orders SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.0],
        )?;
        if changed == 0 {
            return Err(anyhow!("work order {} not found", id));
        }
        Ok(())
    }

    fn list(&self, status: Option<WorkOrderStatus>) -> Result<Vec<WorkOrder>> {
        let rows = match status {
            Some(status) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} WHERE status = ?1 ORDER BY id ASC", SELECT_COLUMNS))?;
                let rows = stmt
                    .query_map(params![status.as_str()], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))?;
                let rows = stmt
                    .query_map([], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        rows.into_iter().map(decode_row).collect()
    }
}

// -------------------- In-memory --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryWorkOrderStore {
    orders: Vec<WorkOrder>,
}

impl InMemoryWorkOrderStore {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl WorkOrderStore for InMemoryWorkOrderStore {
    fn create(&mut self, order: &NewWorkOrder, created_at: u64) -> Result<TicketId> {
        let id = TicketId(self.orders.len() as i64 + 1);
        self.orders.push(WorkOrder {
            id,
            created_at,
            title: order.title.clone(),
            description: order.description.clone(),
            priority: order.priority,
            latitude: order.latitude,
            longitude: order.longitude,
            evidence: order.evidence.clone(),
            status: WorkOrderStatus::Open,
        });
        Ok(id)
    }

    fn get(&self, id: TicketId) -> Result<Option<WorkOrder>> {
        Ok(self.orders.iter().find(|o| o.id == id).cloned())
    }

    fn update_status(&mut self, id: TicketId, status: WorkOrderStatus) -> Result<()> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| anyhow!("work order {} not found", id))?;
        order.status = status;
        Ok(())
    }

    fn list(&self, status: Option<WorkOrderStatus>) -> Result<Vec<WorkOrder>> {
        Ok(self
            .orders
            .iter()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect())
    }
}
