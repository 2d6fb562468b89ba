use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use crate::landmark::PointSet;
use crate::my_types::*;

/// One line of a recorded tracking stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub time: f64,
    /// None marks a frame without landmarks.
    pub points: Option<PointSet>,
}

/// Appends tracking output to a JSON Lines file, one frame per line.
pub struct Recorder {
    writer: BufWriter<File>,
}

impl Recorder {
    pub fn new(path: &Path) -> Result<Recorder> {
        let file = File::create(path)
            .context(format!("Failed to create recording {}", path.display()))?;
        Ok(Recorder {
            writer: BufWriter::new(file),
        })
    }

    pub fn push(&mut self, time: f64, points: Option<&PointSet>) -> Result<()> {
        let points = match points {
            Some(set) => Value::Array(set.points.iter().map(|p| json!([p[0], p[1]])).collect()),
            None => Value::Null,
        };
        let line = json!({
            "time": time,
            "points": points,
        });
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads a recorded stream back, skipping blank lines.
pub struct Replay<R> {
    reader: R,
    line: String,
    line_number: usize,
}

impl Replay<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Replay<BufReader<File>>> {
        let file =
            File::open(path).context(format!("Failed to open recording {}", path.display()))?;
        Ok(Replay::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> Replay<R> {
    pub fn from_reader(reader: R) -> Replay<R> {
        Replay {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }

    /// Next sample in the stream, None at the end.
    pub fn next(&mut self) -> Result<Option<Sample>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            if self.line.trim().is_empty() {
                continue;
            }
            let sample = parse_sample(&self.line)
                .context(format!("Recording line {}", self.line_number))?;
            return Ok(Some(sample));
        }
    }
}

fn parse_sample(line: &str) -> Result<Sample> {
    let value: Value = serde_json::from_str(line)?;
    let time = value["time"]
        .as_f64()
        .ok_or(anyhow!("Sample time is not a number"))?;
    let points = match &value["points"] {
        Value::Null => None,
        Value::Array(items) => {
            let mut points = Vec::with_capacity(items.len());
            for item in items {
                let pair = item.as_array().ok_or(anyhow!("Point is not an array"))?;
                if pair.len() != 2 {
                    bail!("Point has {} coordinates", pair.len());
                }
                let x = pair[0].as_f64().ok_or(anyhow!("Bad point coordinate"))?;
                let y = pair[1].as_f64().ok_or(anyhow!("Bad point coordinate"))?;
                points.push(Vector2d::new(x, y));
            }
            Some(PointSet::new(points))
        }
        _ => bail!("Sample points is neither null nor an array"),
    };
    Ok(Sample { time, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_replay_parses_stream() {
        let data = concat!(
            "{\"time\": 0.0, \"points\": [[10.0, 20.0], [30.5, 40.25]]}\n",
            "\n",
            "{\"time\": 0.033, \"points\": null}\n",
        );
        let mut replay = Replay::from_reader(Cursor::new(data));

        let first = replay.next().unwrap().unwrap();
        assert_eq!(first.time, 0.0);
        let points = first.points.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points.points[1], Vector2d::new(30.5, 40.25));

        let second = replay.next().unwrap().unwrap();
        assert_eq!(second.time, 0.033);
        assert!(second.points.is_none());

        assert!(replay.next().unwrap().is_none());
    }

    #[test]
    fn test_roundtrip_through_file() {
        let path =
            std::env::temp_dir().join(format!("handtrack-test-{}.jsonl", std::process::id()));
        let samples = vec![
            Sample {
                time: 0.,
                points: Some(PointSet::new(vec![
                    Vector2d::new(1.5, 2.5),
                    Vector2d::new(3., 4.),
                ])),
            },
            Sample {
                time: 1. / 30.,
                points: None,
            },
            Sample {
                time: 2. / 30.,
                points: Some(PointSet::new(vec![Vector2d::new(5., 6.)])),
            },
        ];

        let mut recorder = Recorder::new(&path).unwrap();
        for sample in &samples {
            recorder.push(sample.time, sample.points.as_ref()).unwrap();
        }
        recorder.finish().unwrap();

        let mut replay = Replay::open(&path).unwrap();
        let mut read = vec![];
        while let Some(sample) = replay.next().unwrap() {
            read.push(sample);
        }
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_malformed_lines_are_errors() {
        let mut replay = Replay::from_reader(Cursor::new("not json\n"));
        assert!(replay.next().is_err());

        let mut replay = Replay::from_reader(Cursor::new("{\"points\": null}\n"));
        assert!(replay.next().is_err());

        let mut replay = Replay::from_reader(Cursor::new("{\"time\": 0.0, \"points\": 5}\n"));
        assert!(replay.next().is_err());
    }
}
