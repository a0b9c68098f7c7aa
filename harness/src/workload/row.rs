use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::workload::{PidMode, WorkerSpec};

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bob", "Carol", "Dmitri", "Eun-ji", "Farah", "Goran", "Hana", "Ilya", "Jun",
    "Kwame", "Lucy", "Mateo", "Nadia", "Oskar", "Priya",
];

const LAST_NAMES: &[&str] = &[
    "Kim", "Smith", "Garcia", "Novak", "Okafor", "Tanaka", "Silva", "Haddad", "Larsen", "Park",
];

const STREETS: &[&str] = &[
    "Maple Ave", "Harbor Rd", "Station St", "Hillside Dr", "Market Sq", "River Ln",
];

const COMPANIES: &[&str] = &[
    "Northwind", "Contoso", "Initech", "Globex", "Umbrella", "Hooli", "Vandelay",
];

/// A row of the `person` table written by insert workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub pid: i64,
    /// Increasing sequence within the worker that wrote the row.
    pub seq: i64,
    pub name: String,
    pub address: String,
    pub ip: String,
    pub birth: NaiveDate,
    pub company: String,
    pub phone: String,
}

/// Deterministic fake-row generator, seeded per worker.
#[derive(Debug)]
pub struct RowGenerator {
    rng: StdRng,
    worker_id: u32,
    pid_mode: PidMode,
    batch_size: u64,
}

impl RowGenerator {
    pub fn new(spec: &WorkerSpec) -> Self {
        Self {
            rng: StdRng::seed_from_u64(u64::from(spec.id)),
            worker_id: spec.id,
            pid_mode: spec.pid_mode,
            batch_size: spec.batch_size,
        }
    }

    /// Generates `len` rows for batch `batch_index`; `seq` continues from earlier batches.
    pub fn batch(&mut self, batch_index: u64, len: u64) -> Vec<SourceRow> {
        let pid = match self.pid_mode {
            PidMode::WorkerId => i64::from(self.worker_id),
            PidMode::BatchIndex => batch_index as i64,
        };
        let first_seq = batch_index * self.batch_size;

        (0..len)
            .map(|offset| self.row(pid, (first_seq + offset) as i64))
            .collect()
    }

    fn row(&mut self, pid: i64, seq: i64) -> SourceRow {
        let first = FIRST_NAMES.choose(&mut self.rng).copied().unwrap_or("Alex");
        let last = LAST_NAMES.choose(&mut self.rng).copied().unwrap_or("Doe");
        let street = STREETS.choose(&mut self.rng).copied().unwrap_or("Main St");
        let company = COMPANIES.choose(&mut self.rng).copied().unwrap_or("Acme");

        let birth = NaiveDate::from_ymd_opt(
            self.rng.gen_range(1950..2005),
            self.rng.gen_range(1..=12),
            self.rng.gen_range(1..=28),
        )
        .unwrap_or_default();

        SourceRow {
            pid,
            seq,
            name: format!("{first} {last}"),
            address: format!("{} {street}", self.rng.gen_range(1..999)),
            ip: format!(
                "10.{}.{}.{}",
                self.rng.gen_range(0..=255),
                self.rng.gen_range(0..=255),
                self.rng.gen_range(1..=254)
            ),
            birth,
            company: company.to_string(),
            phone: format!(
                "010-{:04}-{:04}",
                self.rng.gen_range(0..10_000),
                self.rng.gen_range(0..10_000)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_continue_across_batches() {
        let spec = WorkerSpec::insert(3, 250, 100);
        let mut generator = RowGenerator::new(&spec);

        let first = generator.batch(0, 100);
        let last = generator.batch(2, 50);

        assert_eq!(first[0].seq, 0);
        assert_eq!(last[0].seq, 200);
        assert_eq!(last[49].seq, 249);
        assert!(first.iter().chain(&last).all(|row| row.pid == 3));
    }

    #[test]
    fn batch_index_mode_uses_batch_as_pid() {
        let spec = WorkerSpec::insert(1, 6_500, 100).with_pid_mode(PidMode::BatchIndex);
        let mut generator = RowGenerator::new(&spec);

        assert!(generator.batch(64, 100).iter().all(|row| row.pid == 64));
    }

    #[test]
    fn generation_is_deterministic_per_worker() {
        let spec = WorkerSpec::insert(9, 10, 10);
        let a = RowGenerator::new(&spec).batch(0, 10);
        let b = RowGenerator::new(&spec).batch(0, 10);
        assert_eq!(a, b);
    }
}
