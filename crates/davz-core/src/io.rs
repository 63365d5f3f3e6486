//! Serialization helpers for event files and cluster output.
//!
//! JSON and CBOR read/write utilities with extension-based auto-detection.
//! Unknown/missing extensions are rejected for reads and default to JSON
//! for writes. `.jsonl`/`.ndjson` inputs carry one bare [`TrackRecord`] per
//! line (no beam spot), which covers the plain track-dump case.

use crate::clusterizer::VertexCandidate;
use crate::track::{BeamSpot, TrackRecord};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

/// Event envelope consumed by the CLI, benches and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFile {
    /// Format/version tag for forward-compat.
    pub version: u16,
    /// Transverse beam profile for this event.
    #[serde(default)]
    pub beam_spot: BeamSpot,
    /// Track records.
    pub tracks: Vec<TrackRecord>,
    /// Optional metadata (generator seed, detector id…).
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Ensure the parent directory for a file exists (no-op if none).
fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Return the lowercase extension (without dot) if present.
fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// ------------------------------
/// EventFile I/O
/// ------------------------------

/// Read an [`EventFile`] from **JSON**.
pub fn read_event_json<P: AsRef<Path>>(path: P) -> Result<EventFile> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let rdr = BufReader::new(f);
    let v: EventFile = serde_json::from_reader(rdr).context("deserialize JSON event")?;
    Ok(v)
}

/// Write an [`EventFile`] to **JSON** (pretty).
pub fn write_event_json<P: AsRef<Path>>(path: P, v: &EventFile) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let w = BufWriter::new(f);
    serde_json::to_writer_pretty(w, v).context("serialize JSON event")?;
    Ok(())
}

/// Read an [`EventFile`] from **CBOR**.
pub fn read_event_cbor<P: AsRef<Path>>(path: P) -> Result<EventFile> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let mut rdr = BufReader::new(f);
    let v: EventFile = ciborium::de::from_reader(&mut rdr).context("deserialize CBOR event")?;
    Ok(v)
}

/// Write an [`EventFile`] to **CBOR**.
pub fn write_event_cbor<P: AsRef<Path>>(path: P, v: &EventFile) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let mut w = BufWriter::new(f);
    ciborium::ser::into_writer(v, &mut w).context("serialize CBOR event")?;
    Ok(())
}

/// Read one [`TrackRecord`] per line (NDJSON); beam spot defaults to zero.
pub fn read_event_jsonl<P: AsRef<Path>>(path: P) -> Result<EventFile> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let rdr = BufReader::new(f);

    let mut tracks = Vec::new();
    for (n, line) in rdr.lines().enumerate() {
        let line = line.with_context(|| format!("read line {} of {}", n + 1, path_ref.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let t: TrackRecord = serde_json::from_str(&line)
            .with_context(|| format!("deserialize track on line {}", n + 1))?;
        tracks.push(t);
    }

    Ok(EventFile {
        version: 1,
        beam_spot: BeamSpot::default(),
        tracks,
        meta: None,
    })
}

/// Auto-detect read by extension `.json` / `.cbor` / `.jsonl` / `.ndjson`.
pub fn read_event_auto<P: AsRef<Path>>(path: P) -> Result<EventFile> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => read_event_json(path),
        Some("cbor") => read_event_cbor(path),
        Some("jsonl" | "ndjson") => read_event_jsonl(path),
        Some(other) => Err(anyhow!(
            "unsupported event extension: {} (supported: .json, .cbor, .jsonl, .ndjson)",
            other
        )),
        None => Err(anyhow!(
            "path has no extension (expected .json, .cbor, .jsonl, or .ndjson)"
        )),
    }
}

/// Auto-detect write (defaults to **JSON** if unknown or missing).
pub fn write_event_auto<P: AsRef<Path>>(path: P, v: &EventFile) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("cbor") => write_event_cbor(path, v),
        _ => write_event_json(path, v),
    }
}

/// ------------------------------
/// Cluster output
/// ------------------------------

/// Write vertex candidates to **JSON** (pretty).
pub fn write_clusters_json<P: AsRef<Path>>(path: P, v: &[VertexCandidate]) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let w = BufWriter::new(f);
    serde_json::to_writer_pretty(w, v).context("serialize JSON clusters")?;
    Ok(())
}

/// Write vertex candidates to **CBOR**.
pub fn write_clusters_cbor<P: AsRef<Path>>(path: P, v: &[VertexCandidate]) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", path_ref.display()))?;
    let mut w = BufWriter::new(f);
    ciborium::ser::into_writer(v, &mut w).context("serialize CBOR clusters")?;
    Ok(())
}

/// Read vertex candidates back from **JSON** (round-trip convenience).
pub fn read_clusters_json<P: AsRef<Path>>(path: P) -> Result<Vec<VertexCandidate>> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let rdr = BufReader::new(f);
    let v: Vec<VertexCandidate> =
        serde_json::from_reader(rdr).context("deserialize JSON clusters")?;
    Ok(v)
}

/// Auto-detect write for clusters (defaults to **JSON** if unknown).
pub fn write_clusters_auto<P: AsRef<Path>>(path: P, v: &[VertexCandidate]) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("cbor") => write_clusters_cbor(path, v),
        _ => write_clusters_json(path, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str, ext: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("davz_core_io_{}_{}.{}", name, nanos, ext));
        p
    }

    fn sample_event() -> EventFile {
        EventFile {
            version: 1,
            beam_spot: BeamSpot {
                width_x: 0.001,
                width_y: 0.001,
            },
            tracks: vec![TrackRecord::at(-0.5, 0.05), TrackRecord::at(0.5, 0.04)],
            meta: Some(serde_json::json!({"seed": 42})),
        }
    }

    #[test]
    fn event_json_roundtrip() {
        let path = tmp_path("event", "json");
        let ev = sample_event();
        write_event_auto(&path, &ev).unwrap();
        let got = read_event_auto(&path).unwrap();
        assert_eq!(got.tracks.len(), ev.tracks.len());
        assert!((got.tracks[0].z_pca - ev.tracks[0].z_pca).abs() < 1e-12);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn event_cbor_roundtrip() {
        let path = tmp_path("event", "cbor");
        let ev = sample_event();
        write_event_auto(&path, &ev).unwrap();
        let got = read_event_auto(&path).unwrap();
        assert_eq!(got.version, ev.version);
        assert!((got.beam_spot.width_x - ev.beam_spot.width_x).abs() < 1e-12);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn jsonl_reads_bare_tracks() {
        let path = tmp_path("tracks", "jsonl");
        let mut lines = String::new();
        for t in sample_event().tracks {
            lines.push_str(&serde_json::to_string(&t).unwrap());
            lines.push('\n');
        }
        std::fs::write(&path, lines).unwrap();

        let got = read_event_auto(&path).unwrap();
        assert_eq!(got.tracks.len(), 2);
        assert!((got.beam_spot.width_x).abs() < 1e-12);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = read_event_auto("event.xml").unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn clusters_json_roundtrip() {
        let path = tmp_path("clusters", "json");
        let clusters = vec![VertexCandidate {
            z: 0.25,
            zz_cov: 0.01,
            tracks: vec![0, 3, 5],
        }];
        write_clusters_auto(&path, &clusters).unwrap();
        let got = read_clusters_json(&path).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tracks, vec![0, 3, 5]);
        let _ = std::fs::remove_file(path);
    }
}
