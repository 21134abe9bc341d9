//! Evaluation cache.
//!
//! Every evaluated point is stored exactly once, keyed by a canonical
//! encoding of its coordinates rounded to their granularity. The cache is
//! shared between the coordinator and the worker pool, so its table sits
//! behind a mutex.
//!
//! The cache file is line oriented: one JSON header line declaring the
//! dimension and the output schema, then one JSON record per point.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::mads::param::DEFAULT_EPSILON;
use crate::mads::types::{BbOutputType, EvalStatus, InputType};

/// One stored evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub x: Vec<f64>,
    /// Outputs aligned with the output schema, `None` where undefined.
    pub outputs: Vec<Option<f64>>,
    pub status: EvalStatus,
    /// Insertion order, unique within a cache.
    pub tag: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheHeader {
    dimension: usize,
    bb_output_type: Vec<BbOutputType>,
}

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<String, CacheEntry>,
    next_tag: u64,
    inserts: usize,
}

/// Thread-safe evaluation cache.
#[derive(Debug)]
pub struct Cache {
    input_types: Vec<InputType>,
    output_types: Vec<BbOutputType>,
    // Digits after the point in the scientific encoding of continuous
    // coordinates.
    precision: usize,
    table: Mutex<Table>,
}

impl Cache {
    pub fn new(input_types: &[InputType], output_types: &[BbOutputType]) -> Self {
        Self {
            input_types: input_types.to_vec(),
            output_types: output_types.to_vec(),
            precision: key_precision(DEFAULT_EPSILON),
            table: Mutex::new(Table::default()),
        }
    }

    /// Keys continuous coordinates to the relative tolerance `epsilon`: two
    /// values closer than that share a key.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.precision = key_precision(epsilon);
        self
    }

    pub fn dimension(&self) -> usize {
        self.input_types.len()
    }

    /// Canonical key of a point: granule counts for granular coordinates,
    /// as many significant digits as the point-equality tolerance resolves
    /// for continuous ones (13 for the default 1e-13).
    pub fn key(&self, x: &[f64]) -> String {
        let mut key = String::with_capacity(x.len() * 20);
        for (i, (&v, t)) in x.iter().zip(&self.input_types).enumerate() {
            if i > 0 {
                key.push('|');
            }
            let g = t.granularity();
            if g > 0.0 {
                let count = (v / g).round();
                // -0 and 0 are the same granule
                key.push_str(&format!("{}", if count == 0.0 { 0.0 } else { count }));
            } else {
                let v = if v == 0.0 { 0.0 } else { v };
                key.push_str(&format!("{v:.*e}", self.precision));
            }
        }
        key
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        let key = self.key(x);
        self.table.lock().entries.contains_key(&key)
    }

    /// Stored evaluation of `x`, if any.
    pub fn lookup(&self, x: &[f64]) -> Option<CacheEntry> {
        let key = self.key(x);
        self.table.lock().entries.get(&key).cloned()
    }

    /// Records the evaluation of `x`.
    ///
    /// Re-inserting identical outputs returns the existing entry. Different
    /// outputs for a stored point are a [`Error::CacheInconsistent`].
    pub fn insert(
        &self,
        x: &[f64],
        outputs: Vec<Option<f64>>,
        status: EvalStatus,
    ) -> Result<CacheEntry> {
        if x.len() != self.dimension() {
            return Err(Error::CacheInconsistent(format!(
                "point of dimension {} in a cache of dimension {}",
                x.len(),
                self.dimension()
            )));
        }
        let key = self.key(x);
        let mut table = self.table.lock();
        if let Some(existing) = table.entries.get(&key) {
            if existing.status == status && same_outputs(&existing.outputs, &outputs) {
                return Ok(existing.clone());
            }
            return Err(Error::CacheInconsistent(format!(
                "conflicting outputs recorded for point {key}"
            )));
        }
        let entry = CacheEntry {
            x: self.canonical(x),
            outputs,
            status,
            tag: table.next_tag,
        };
        table.next_tag += 1;
        table.inserts += 1;
        table.entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of new entries created by [`Cache::insert`]. Entries read from
    /// a cache file are not counted.
    pub fn insert_count(&self) -> usize {
        self.table.lock().inserts
    }

    /// All entries, in tag order.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.table.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.tag);
        entries
    }

    /// Serializes the whole cache.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let header = CacheHeader {
            dimension: self.dimension(),
            bb_output_type: self.output_types.clone(),
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;
        for entry in self.entries() {
            serde_json::to_writer(&mut writer, &entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Loads records written by [`Cache::write_to`] into this cache.
    ///
    /// Returns the number of records read. The header must match the
    /// dimension and the output schema of this cache.
    pub fn read_from<R: BufRead>(&self, reader: R) -> Result<usize> {
        let mut lines = reader.lines();
        let header_line = match lines.next() {
            Some(line) => line?,
            None => return Ok(0),
        };
        let header: CacheHeader = serde_json::from_str(&header_line)?;
        if header.dimension != self.dimension() || header.bb_output_type != self.output_types {
            return Err(Error::ParameterInvalid(format!(
                "cache file declares dimension {} and outputs {:?}, expected {} and {:?}",
                header.dimension,
                header.bb_output_type,
                self.dimension(),
                self.output_types
            )));
        }

        let mut count = 0;
        let mut table = self.table.lock();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: CacheEntry = serde_json::from_str(&line)?;
            if entry.x.len() != self.dimension() || entry.outputs.len() != self.output_types.len() {
                return Err(Error::CacheInconsistent(format!(
                    "record {count} has the wrong size"
                )));
            }
            let key = self.key(&entry.x);
            if let Some(existing) = table.entries.get(&key) {
                if existing.status != entry.status || !same_outputs(&existing.outputs, &entry.outputs)
                {
                    return Err(Error::CacheInconsistent(format!(
                        "conflicting outputs recorded for point {key}"
                    )));
                }
            } else {
                table.next_tag = table.next_tag.max(entry.tag + 1);
                table.entries.insert(key, entry);
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    /// Loads a cache file. A missing file is an empty cache.
    pub fn load(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(path)?;
        self.read_from(BufReader::new(file))
    }

    // Rounds granular coordinates so stored points sit exactly on their granule.
    fn canonical(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.input_types)
            .map(|(&v, t)| t.round(v))
            .collect()
    }
}

// Significant digits resolved by a relative tolerance, minus the one before
// the point.
fn key_precision(epsilon: f64) -> usize {
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return 16;
    }
    (-epsilon.log10()).round().clamp(1.0, 17.0) as usize - 1
}

fn same_outputs(a: &[Option<f64>], b: &[Option<f64>]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(u, v)| match (u, v) {
            (Some(u), Some(v)) => approx::relative_eq!(*u, *v, max_relative = 1e-13),
            (None, None) => true,
            _ => false,
        })
}
