//! Event tables: flat CSV/TSV/Parquet rows or JSON Lines of [`Event`]. An empty `jet_pt` means
//! the event has no probe jet.

use crate::classify::truth::GenTruthSet;
use crate::event::Event;
use crate::kinematics::jet::{leading_subjet_fraction, min_pair_mass, ProbeJet};
use crate::kinematics::vector::FourMomentum;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const SUBJET_PREFIXES: [&str; 3] = ["sj1", "sj2", "sj3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventsKind {
    Delimited(u8),
    Parquet,
    JsonLines,
}

fn infer_events_kind(path: &Path) -> Result<EventsKind> {
    let p = path.to_string_lossy().to_ascii_lowercase();
    if p.ends_with(".parquet") || p.ends_with(".pq") {
        return Ok(EventsKind::Parquet);
    }
    if p.ends_with(".csv") || p.ends_with(".csv.gz") {
        return Ok(EventsKind::Delimited(b','));
    }
    if p.ends_with(".tsv") || p.ends_with(".tsv.gz") || p.ends_with(".txt") || p.ends_with(".txt.gz") {
        return Ok(EventsKind::Delimited(b'\t'));
    }
    if p.ends_with(".jsonl") || p.ends_with(".jsonl.gz") || p.ends_with(".ndjson") {
        return Ok(EventsKind::JsonLines);
    }
    Err(anyhow!(
        "unsupported events extension: {} (expected .csv(.gz), .tsv(.gz), .parquet, .jsonl)",
        path.display()
    ))
}

pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let events = match infer_events_kind(path)? {
        EventsKind::Delimited(delim) => read_events_delimited(path, delim),
        EventsKind::Parquet => read_events_parquet(path),
        EventsKind::JsonLines => read_events_jsonl(path),
    }
    .with_context(|| format!("failed reading events: {}", path.display()))?;
    tracing::debug!(path = %path.display(), events = events.len(), "events loaded");
    Ok(events)
}

/// Builds one event from a numeric column lookup and the truth label.
fn event_from_columns<F>(mut num: F, truth: Option<&str>) -> Result<Event>
where
    F: FnMut(&str) -> Result<Option<f64>>,
{
    let weight = num("weight")?.unwrap_or(1.0);
    if !weight.is_finite() {
        return Err(anyhow!("non-finite weight"));
    }

    let jet = match num("jet_pt")? {
        None => None,
        Some(pt) => {
            let mut p4 = |prefix: &str| -> Result<Option<FourMomentum>> {
                let Some(pt) = num(&format!("{prefix}_pt"))? else {
                    return Ok(None);
                };
                Ok(Some(FourMomentum::new(
                    pt,
                    num(&format!("{prefix}_eta"))?.unwrap_or(0.0),
                    num(&format!("{prefix}_phi"))?.unwrap_or(0.0),
                    num(&format!("{prefix}_mass"))?.unwrap_or(0.0),
                )))
            };
            let jet_p4 = p4("jet")?.ok_or_else(|| anyhow!("jet_pt vanished"))?;
            let mut subjets = Vec::new();
            for prefix in SUBJET_PREFIXES {
                if let Some(sj) = p4(prefix)? {
                    subjets.push(sj);
                }
            }
            let tau32 = num("tau32")?.ok_or_else(|| anyhow!("probe jet without tau32"))?;
            Some(ProbeJet {
                pt_raw: num("jet_pt_raw")?.unwrap_or(pt),
                pair_mass: min_pair_mass(&subjets).unwrap_or(0.0),
                subjet_fraction: leading_subjet_fraction(pt, &subjets).unwrap_or(0.0),
                btag: num("btag")?.unwrap_or(0.0),
                tau32,
                subjets,
                p4: jet_p4,
            })
        }
    };

    let truth = match truth.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("none") | Some("na") => None,
        Some(kind @ ("top" | "associated")) => {
            let mut parton = |prefix: &str| -> Result<FourMomentum> {
                let mut get = |field: &str| -> Result<f64> {
                    num(&format!("{prefix}_{field}"))?
                        .ok_or_else(|| anyhow!("truth '{kind}' without {prefix}_{field}"))
                };
                Ok(FourMomentum::new(get("pt")?, get("eta")?, get("phi")?, 0.0))
            };
            let (b, q1, q2) = (parton("b")?, parton("q1")?, parton("q2")?);
            Some(if kind == "top" {
                GenTruthSet::TopDecay { b, q1, q2 }
            } else {
                GenTruthSet::Associated { b, q1, q2 }
            })
        }
        Some(other) => return Err(anyhow!("unknown truth label '{other}'")),
    };

    Ok(Event { weight, jet, truth })
}

fn read_events_delimited(path: &Path, delimiter: u8) -> Result<Vec<Event>> {
    let reader = crate::io::tsv::open_maybe_gz(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers().context("failed reading header row")?.clone();
    let index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_string(), i))
        .collect();
    let idx_truth = index.get("truth").copied();

    let mut out: Vec<Event> = Vec::new();
    for (row_idx, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("failed reading record {}", row_idx + 1))?;
        let num = |name: &str| -> Result<Option<f64>> {
            match index.get(name).and_then(|&i| rec.get(i)) {
                None => Ok(None),
                Some(raw) => crate::io::tsv::parse_opt_f64(raw),
            }
        };
        let truth = idx_truth.and_then(|i| rec.get(i));
        let event = event_from_columns(num, truth)
            .with_context(|| format!("invalid event at record {}", row_idx + 1))?;
        out.push(event);
    }
    Ok(out)
}

fn read_events_jsonl(path: &Path) -> Result<Vec<Event>> {
    let reader = BufReader::new(crate::io::tsv::open_maybe_gz(path)?);
    let mut out: Vec<Event> = Vec::new();
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed reading line {}", line_idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut event: Event = serde_json::from_str(&line)
            .with_context(|| format!("invalid event JSON at line {}", line_idx + 1))?;
        if let Some(jet) = event.jet.as_mut() {
            refresh_substructure(jet);
        }
        out.push(event);
    }
    Ok(out)
}

/// Substructure scalars follow the subjets when there are any.
fn refresh_substructure(jet: &mut ProbeJet) {
    if jet.subjets.is_empty() {
        return;
    }
    jet.pair_mass = min_pair_mass(&jet.subjets).unwrap_or(0.0);
    jet.subjet_fraction = leading_subjet_fraction(jet.p4.pt, &jet.subjets).unwrap_or(0.0);
}

fn read_events_parquet(path: &Path) -> Result<Vec<Event>> {
    use parquet::file::reader::{FileReader, SerializedFileReader};

    let file = File::open(path).with_context(|| format!("failed to open: {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("failed creating parquet reader")?;
    let iter = reader
        .get_row_iter(None)
        .context("failed creating parquet row iterator")?;

    let mut index: Option<HashMap<String, usize>> = None;
    let mut out: Vec<Event> = Vec::new();
    for (row_idx, row) in iter.enumerate() {
        let row = row.context("failed reading parquet row")?;
        let index = index.get_or_insert_with(|| {
            row.get_column_iter()
                .enumerate()
                .map(|(i, (name, _))| (name.clone(), i))
                .collect()
        });
        let fields: Vec<&parquet::record::Field> = row.get_column_iter().map(|(_, f)| f).collect();

        let num = |name: &str| -> Result<Option<f64>> {
            match index.get(name).and_then(|&i| fields.get(i)) {
                None => Ok(None),
                Some(field) => field_f64(field).with_context(|| format!("column '{name}'")),
            }
        };
        let truth = match index.get("truth").and_then(|&i| fields.get(i)) {
            None => None,
            Some(field) => field_string(field)?,
        };
        let event = event_from_columns(num, truth.as_deref())
            .with_context(|| format!("invalid event at parquet row {}", row_idx + 1))?;
        out.push(event);
    }
    Ok(out)
}

fn field_f64(field: &parquet::record::Field) -> Result<Option<f64>> {
    use parquet::record::Field;
    match field {
        Field::Null => Ok(None),
        Field::Double(v) => Ok(Some(*v)),
        Field::Float(v) => Ok(Some(*v as f64)),
        Field::Byte(v) => Ok(Some(*v as f64)),
        Field::Short(v) => Ok(Some(*v as f64)),
        Field::Int(v) => Ok(Some(*v as f64)),
        Field::Long(v) => Ok(Some(*v as f64)),
        Field::UByte(v) => Ok(Some(*v as f64)),
        Field::UShort(v) => Ok(Some(*v as f64)),
        Field::UInt(v) => Ok(Some(*v as f64)),
        Field::ULong(v) => Ok(Some(*v as f64)),
        Field::Str(s) => crate::io::tsv::parse_opt_f64(s),
        other => Err(anyhow!("cannot decode parquet numeric value {other}")),
    }
}

fn field_string(field: &parquet::record::Field) -> Result<Option<String>> {
    use parquet::record::Field;
    match field {
        Field::Null => Ok(None),
        Field::Str(s) => Ok(Some(s.clone())),
        Field::Bytes(b) => Ok(Some(b.as_utf8()?.to_string())),
        other => Err(anyhow!("cannot decode parquet string value {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use std::fs;

    const HEADER: &str = "weight,jet_pt,jet_eta,jet_phi,jet_mass,jet_pt_raw,tau32,btag,\
sj1_pt,sj1_eta,sj1_phi,sj1_mass,sj2_pt,sj2_eta,sj2_phi,sj2_mass,sj3_pt,sj3_eta,sj3_phi,sj3_mass,\
truth,b_pt,b_eta,b_phi,q1_pt,q1_eta,q1_phi,q2_pt,q2_eta,q2_phi";

    #[test]
    fn csv_rows_become_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let rows = [
            HEADER.to_string(),
            "0.5,450,0.1,0.2,175,440,0.45,0.9,200,0.1,0.1,20,150,0.2,0.3,15,100,0.0,0.2,10,\
top,120,0.1,0.1,90,0.2,0.3,80,0.0,0.2"
                .to_string(),
            "-1.0,,,,,,,,,,,,,,,,,,,,none,,,,,,,,,".to_string(),
            "1.0,350,0,0,90,,0.8,,,,,,,,,,,,,,associated,50,1,1,40,1,1,30,1,1".to_string(),
        ];
        fs::write(&path, rows.join("\n")).unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 3);

        let jet = events[0].jet.as_ref().unwrap();
        assert_eq!(events[0].weight, 0.5);
        assert_eq!(jet.pt_raw, 440.0);
        assert_eq!(jet.n_subjets(), 3);
        assert_eq!(jet.btag, 0.9);
        assert_relative_eq!(jet.subjet_fraction, 200.0 / 450.0);
        assert!(jet.pair_mass > 0.0);
        assert!(matches!(events[0].truth, Some(GenTruthSet::TopDecay { .. })));

        assert_eq!(events[1].weight, -1.0);
        assert_eq!(events[1].jet, None);
        assert_eq!(events[1].truth, None);

        let jet = events[2].jet.as_ref().unwrap();
        assert_eq!(jet.pt_raw, 350.0);
        assert_eq!(jet.n_subjets(), 0);
        assert!(events[2].truth.unwrap().is_associated());
    }

    #[test]
    fn missing_truth_partons_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.tsv");
        fs::write(&path, "weight\tjet_pt\ttau32\ttruth\tb_pt\n1\t400\t0.5\ttop\t100\n").unwrap();
        let err = format!("{:#}", read_events(&path).unwrap_err());
        assert!(err.contains("record 1"), "{err}");
        assert!(err.contains("b_eta"), "{err}");
    }

    #[test]
    fn unknown_truth_label_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.tsv");
        fs::write(&path, "jet_pt\ttau32\ttruth\n400\t0.5\thiggs\n").unwrap();
        assert!(read_events(&path).is_err());
    }

    #[test]
    fn json_lines_use_the_event_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let event = Event {
            weight: 2.0,
            jet: Some(ProbeJet {
                p4: FourMomentum::new(500.0, 0.0, 1.0, 170.0),
                pt_raw: 480.0,
                subjets: Vec::new(),
                tau32: 0.4,
                pair_mass: 60.0,
                subjet_fraction: 0.5,
                btag: 0.1,
            }),
            truth: Some(GenTruthSet::TopDecay {
                b: FourMomentum::massless(100.0, 0.0, 1.0),
                q1: FourMomentum::massless(100.0, 0.1, 1.0),
                q2: FourMomentum::massless(100.0, -0.1, 1.0),
            }),
        };
        let lines = format!("{}\n\n{}\n", serde_json::to_string(&event).unwrap(), r#"{"weight": 1.0}"#);
        fs::write(&path, lines).unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events, vec![event, Event { weight: 1.0, jet: None, truth: None }]);
    }

    #[test]
    fn json_lines_derive_substructure_from_subjets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let line = r#"{"weight": 1.0, "jet": {"p4": {"pt": 500, "eta": 0, "phi": 0, "mass": 175},
            "pt_raw": 500, "tau32": 0.4, "subjets": [
                {"pt": 200, "eta": 0.0, "phi": 0.0, "mass": 20},
                {"pt": 150, "eta": 0.5, "phi": 0.5, "mass": 15},
                {"pt": 100, "eta": -0.5, "phi": 0.6, "mass": 10}]}}"#;
        fs::write(&path, line.replace('\n', " ")).unwrap();

        let events = read_events(&path).unwrap();
        let jet = events[0].jet.as_ref().unwrap();
        assert_relative_eq!(jet.pair_mass, min_pair_mass(&jet.subjets).unwrap());
        assert!(jet.pair_mass > 100.0, "{}", jet.pair_mass);
        assert_relative_eq!(jet.subjet_fraction, 0.4);
        assert!(crate::histo::bucket::Preselection::hotvr().accepts(jet));
    }

    #[test]
    fn unsupported_extension() {
        assert!(read_events("events.root").is_err());
    }
}
