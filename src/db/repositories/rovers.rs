use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{conversion_error, format_timestamp, parse_datetime},
    models::{NewRover, Rover},
};

fn row_to_rover(row: &Row) -> Result<Rover, rusqlite::Error> {
    let created_at: String = row.get(5)?;

    Ok(Rover {
        rover_id: row.get(0)?,
        initial_id: row.get(1)?,
        rover_status: row.get(2)?,
        user_id: row.get(3)?,
        nickname: row.get(4)?,
        created_at: parse_datetime(&created_at, "created_at")
            .map_err(|err| conversion_error(5, err))?,
    })
}

pub struct RoverRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RoverRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Register a rover. Without a nickname it is called `rover-{rover_id}`.
    pub fn insert(&self, rover: &NewRover) -> Result<Rover> {
        let created_at = Utc::now();

        self.conn.execute(
            "INSERT INTO rovers (initial_id, rover_status, user_id, nickname, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rover.initial_id,
                rover.rover_status,
                rover.user_id,
                rover.nickname.as_deref().unwrap_or_default(),
                format_timestamp(&created_at),
            ],
        )?;
        let rover_id = self.conn.last_insert_rowid();

        let nickname = match &rover.nickname {
            Some(nickname) => nickname.clone(),
            None => {
                let generated = format!("rover-{rover_id}");
                self.conn.execute(
                    "UPDATE rovers SET nickname = ?1 WHERE rover_id = ?2",
                    params![generated, rover_id],
                )?;
                generated
            }
        };

        Ok(Rover {
            rover_id,
            initial_id: rover.initial_id,
            rover_status: rover.rover_status,
            user_id: rover.user_id,
            nickname,
            created_at,
        })
    }

    pub fn get(&self, rover_id: i64) -> Result<Option<Rover>> {
        self.conn
            .query_row(
                "SELECT rover_id, initial_id, rover_status, user_id, nickname, created_at
                 FROM rovers WHERE rover_id = ?1",
                params![rover_id],
                row_to_rover,
            )
            .optional()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::{run_migrations, Schema};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, Schema::Staging).unwrap();
        conn
    }

    #[test]
    fn nickname_defaults_to_rover_id() {
        let conn = conn();
        let repo = RoverRepository::new(&conn);
        let rover = repo
            .insert(&NewRover {
                initial_id: 10,
                rover_status: 1,
                user_id: 3,
                nickname: None,
            })
            .unwrap();

        assert_eq!(rover.nickname, format!("rover-{}", rover.rover_id));
        let stored = repo.get(rover.rover_id).unwrap().unwrap();
        assert_eq!(stored, rover);
    }

    #[test]
    fn unknown_rover_is_none() {
        let conn = conn();
        assert!(RoverRepository::new(&conn).get(42).unwrap().is_none());
    }
}
