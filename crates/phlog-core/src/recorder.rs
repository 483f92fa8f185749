//! Sample Recorder: one CSV row per sample, flushed as soon as it is written.

use chrono::NaiveDateTime;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HEADER: &str = "Time Stamp, Duration/Jitter [s], pH, Signal [V], Current [mA]";

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %I:%M:%S%p";
const FILE_STAMP_FORMAT: &str = "%Y_%m_%d-%I_%M_%S%p";

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    /// Monotonic time since the previous sample.
    pub duration: Duration,
    pub skipped: u64,
    pub voltage: f64, // V
    pub current: f64, // A
    pub value: f64,   // pH
    /// Set when the device read failed and the row carries the 0 V stand-in.
    pub fallback: bool,
}

pub fn format_timestamp(t: &NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// `<dir>/<YYYY_MM_DD-hh_mm_ssAM>-<channel>.csv`
pub fn output_path(dir: &Path, started: &NaiveDateTime, channel: &str) -> PathBuf {
    dir.join(format!("{}-{}.csv", started.format(FILE_STAMP_FORMAT), channel))
}

pub fn format_row(sample: &Sample) -> String {
    format!(
        "{}, {:.1}, {:.3}, {:.3}, {:.3}",
        format_timestamp(&sample.timestamp),
        sample.duration.as_secs_f64(),
        sample.value,
        sample.voltage,
        sample.current * 1e3,
    )
}

pub struct Recorder<W: Write> {
    out: W,
    rows: u64,
}

impl Recorder<File> {
    /// Creates a new file; an existing file is never overwritten.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().append(true).create_new(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write> Recorder<W> {
    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        self.write_line(HEADER)
    }

    pub fn write_row(&mut self, sample: &Sample) -> io::Result<()> {
        self.write_line(&format_row(sample))?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 5, 30)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn sample() -> Sample {
        Sample {
            timestamp: at(14, 3, 9),
            duration: Duration::from_millis(100),
            skipped: 0,
            voltage: 3.0,
            current: 0.012,
            value: 7.0,
            fallback: false,
        }
    }

    #[test]
    fn timestamps_use_twelve_hour_clock() {
        assert_eq!(format_timestamp(&at(14, 3, 9)), "2021/05/30 02:03:09PM");
        assert_eq!(format_timestamp(&at(0, 0, 0)), "2021/05/30 12:00:00AM");
    }

    #[test]
    fn file_name() {
        let path = output_path(Path::new("out"), &at(9, 41, 0), "AIN0");
        assert_eq!(path, Path::new("out").join("2021_05_30-09_41_00AM-AIN0.csv"));
    }

    #[test]
    fn header_then_rows() {
        let mut rec = Recorder::new(Vec::new());
        rec.write_header().unwrap();
        rec.write_row(&sample()).unwrap();
        let mut late = sample();
        late.duration = Duration::from_millis(1349);
        late.value = -0.00246;
        late.voltage = 1.708;
        late.current = 0.003_997_19;
        rec.write_row(&late).unwrap();
        assert_eq!(rec.rows(), 2);

        let text = String::from_utf8(rec.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "Time Stamp, Duration/Jitter [s], pH, Signal [V], Current [mA]\n\
             2021/05/30 02:03:09PM, 0.1, 7.000, 3.000, 12.000\n\
             2021/05/30 02:03:09PM, 1.3, -0.002, 1.708, 3.997\n"
        );
    }
}
