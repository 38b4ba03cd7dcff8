use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NumberPair {
    pub ani: String,
    pub dnis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
}

/// Read-mostly set of number pairs the engine draws from. Replaced wholesale
/// under the write lock; drawing takes the read lock only.
pub struct NumberPool {
    pairs: RwLock<Vec<NumberPair>>,
}

impl NumberPool {
    pub fn new() -> Self {
        Self {
            pairs: RwLock::new(Vec::new()),
        }
    }

    /// Built-in pairs used when no CSV is supplied.
    pub fn test_pairs() -> Vec<NumberPair> {
        [
            ("19543004835", "50764137984"),
            ("19543004836", "50764137985"),
            ("19543004837", "50764137986"),
            ("19543004838", "50764137987"),
            ("19543004839", "50764137988"),
        ]
        .iter()
        .map(|(ani, dnis)| NumberPair {
            ani: ani.to_string(),
            dnis: dnis.to_string(),
            country: None,
            carrier: None,
        })
        .collect()
    }

    pub fn load_csv(&self, path: &str) -> Result<usize> {
        let data = std::fs::read(path)?;
        let pairs = Self::parse_csv(&data)?;
        let count = self.replace(pairs);
        info!("loaded {} number pairs from {}", count, path);
        Ok(count)
    }

    /// Columns: ANI, DNIS, country?, carrier?. A first row whose first cell
    /// is `ANI` is treated as a header. Rows with fewer than two cells are
    /// skipped.
    pub fn parse_csv(data: &[u8]) -> Result<Vec<NumberPair>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);
        let mut pairs = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            if i == 0 && record.get(0).map(str::trim) == Some("ANI") {
                continue;
            }
            let (Some(ani), Some(dnis)) = (record.get(0), record.get(1)) else {
                continue;
            };
            let ani = ani.trim();
            let dnis = dnis.trim();
            if ani.is_empty() || dnis.is_empty() {
                continue;
            }
            pairs.push(NumberPair {
                ani: ani.to_string(),
                dnis: dnis.to_string(),
                country: record.get(2).map(str::trim).filter(|s| !s.is_empty()).map(String::from),
                carrier: record.get(3).map(str::trim).filter(|s| !s.is_empty()).map(String::from),
            });
        }
        Ok(pairs)
    }

    pub fn replace(&self, pairs: Vec<NumberPair>) -> usize {
        let count = pairs.len();
        *self.pairs.write().unwrap() = pairs;
        count
    }

    /// Uniform random draw; `None` when the pool is empty.
    pub fn draw(&self) -> Option<NumberPair> {
        let pairs = self.pairs.read().unwrap();
        if pairs.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..pairs.len());
        Some(pairs[index].clone())
    }

    pub fn len(&self) -> usize {
        self.pairs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NumberPool {
    fn default() -> Self {
        Self::new()
    }
}
