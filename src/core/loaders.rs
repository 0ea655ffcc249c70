//! Capture-file loader for raw multi-channel ADC waveform data.
//!
//! A capture file is line-oriented text:
//! - Four integer header lines: step count, events per step, ADC words
//!   per sample, and samples per pulse (blank lines between them are
//!   skipped).
//! - Repeated event blocks: runs of non-blank lines terminated by a blank
//!   line. Within a block, every line carrying exactly 8
//!   whitespace-separated hexadecimal tokens contributes 8 data words in
//!   line order; any other line (status echo, block header) is ignored.
//!   Repeated blank lines collapse to a single terminator.
//!
//! Each 32-bit data word packs two 16-bit channels: the low half-word is
//! the even channel, the high half-word the odd channel.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use thiserror::Error;

/// Number of ADC channels carried by every capture.
pub const NUM_CHANNELS: usize = 64;

/// Hard ceiling on calibration steps per capture.
pub const MAX_STEPS: usize = 100;

/// Hard ceiling on samples per pulse.
pub const MAX_SAMPLES: usize = 50;

/// Data words carried by a contributing block line.
const WORDS_PER_LINE: usize = 8;

/// Errors that can occur while decoding a capture file.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("{field} {value} exceeds the capacity limit of {limit}")]
    CapacityExceeded {
        field: &'static str,
        value: usize,
        limit: usize,
    },

    #[error("event {event}: expected {expected} data words, found {found}")]
    MalformedEventBlock {
        event: usize,
        expected: usize,
        found: usize,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Decoded capture header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    /// Number of calibration steps in the capture.
    pub step_count: usize,
    /// Repeated events recorded at each step.
    pub events_per_step: usize,
    /// 32-bit data words per sample (32 for a full 64-channel capture).
    pub adc_words_per_step: usize,
    /// ADC samples per pulse.
    pub sample_count: usize,
}

impl CaptureHeader {
    /// Total number of event blocks the capture should contain.
    #[inline]
    pub fn total_events(&self) -> usize {
        self.step_count * self.events_per_step
    }

    /// Data words every terminated event block must carry.
    #[inline]
    pub fn words_per_event(&self) -> usize {
        self.adc_words_per_step * self.sample_count
    }
}

/// One channel's raw ADC samples for a single event.
///
/// Immutable once parsed; consumed by the fitting stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelWaveform {
    /// Channel index in [0, 63].
    pub channel: usize,
    /// Calibration step this event belongs to.
    pub step: usize,
    /// Event index within the step.
    pub event_in_step: usize,
    /// Raw ADC values, one per sample.
    pub samples: Vec<u16>,
}

impl ChannelWaveform {
    /// Index and value of the largest sample (first occurrence wins).
    pub fn max_sample(&self) -> (usize, u16) {
        let mut max_pos = 0;
        let mut max_val = 0u16;
        for (i, &v) in self.samples.iter().enumerate() {
            if v > max_val {
                max_pos = i;
                max_val = v;
            }
        }
        (max_pos, max_val)
    }

    /// First sample, used as the raw baseline estimate.
    #[inline]
    pub fn baseline(&self) -> u16 {
        self.samples.first().copied().unwrap_or(0)
    }
}

/// All 64 channel waveforms decoded from one event block.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Zero-based index of the block within the capture.
    pub index: usize,
    /// Calibration step (`index / events_per_step`).
    pub step: usize,
    /// Event within the step (`index % events_per_step`).
    pub event_in_step: usize,
    /// Exactly [`NUM_CHANNELS`] waveforms, ordered by channel.
    pub waveforms: Vec<ChannelWaveform>,
}

/// Streaming reader over the event blocks of a capture file.
///
/// Parses the header eagerly on construction and then yields one
/// [`EventRecord`] per terminated block. A block whose word count does not
/// match the header yields a [`LoaderError::MalformedEventBlock`]; the
/// iterator remains usable afterwards so callers can choose to skip the
/// event or abort.
pub struct CaptureReader<R: BufRead> {
    header: CaptureHeader,
    lines: Lines<R>,
    pending: Vec<u32>,
    next_event: usize,
    saw_content: bool,
    finished: bool,
}

impl<R: BufRead> CaptureReader<R> {
    /// Parse the capture header and position the reader at the first block.
    pub fn new(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let header = parse_header(&mut lines)?;
        Ok(Self {
            header,
            lines,
            pending: Vec::with_capacity(header.words_per_event()),
            next_event: 0,
            saw_content: false,
            finished: false,
        })
    }

    /// The decoded capture header.
    #[inline]
    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    fn finish_block(&mut self) -> Result<EventRecord> {
        let words = std::mem::take(&mut self.pending);
        self.saw_content = false;

        let index = self.next_event;
        self.next_event += 1;

        let expected = self.header.words_per_event();
        if words.len() != expected {
            return Err(LoaderError::MalformedEventBlock {
                event: index,
                expected,
                found: words.len(),
            });
        }

        Ok(unpack_event(&self.header, index, &words))
    }
}

impl<R: BufRead> Iterator for CaptureReader<R> {
    type Item = Result<EventRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.lines.next() {
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                Some(Ok(line)) => {
                    let trimmed = line.trim();

                    if trimmed.is_empty() {
                        // Blank runs collapse: only a blank that follows
                        // block content terminates an event.
                        if self.saw_content {
                            return Some(self.finish_block());
                        }
                        continue;
                    }

                    self.saw_content = true;

                    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
                    if tokens.len() == WORDS_PER_LINE {
                        let mut words = [0u32; WORDS_PER_LINE];
                        let all_hex = tokens.iter().enumerate().all(|(i, &tok)| {
                            match u32::from_str_radix(tok, 16) {
                                Ok(w) => {
                                    words[i] = w;
                                    true
                                }
                                Err(_) => false,
                            }
                        });
                        // Lines with non-hex tokens are echo lines, not data
                        if all_hex {
                            self.pending.extend_from_slice(&words);
                        }
                    }
                }
                None => {
                    self.finished = true;
                    // A capture that ends without a trailing blank line
                    // still flushes its final block.
                    if self.saw_content {
                        return Some(self.finish_block());
                    }
                    return None;
                }
            }
        }
    }
}

/// Open a capture file and parse its header.
pub fn open_capture<P: AsRef<Path>>(path: P) -> Result<CaptureReader<BufReader<File>>> {
    let file = File::open(path.as_ref())?;
    CaptureReader::new(BufReader::new(file))
}

fn parse_header<R: BufRead>(lines: &mut Lines<R>) -> Result<CaptureHeader> {
    const FIELDS: [&str; 4] = [
        "step count",
        "events per step",
        "ADC words per step",
        "sample count",
    ];

    let mut values = [0usize; 4];
    let mut idx = 0;

    while idx < FIELDS.len() {
        let line = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(LoaderError::MalformedHeader(format!(
                    "missing {} line",
                    FIELDS[idx]
                )))
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: usize = trimmed.parse().map_err(|_| {
            LoaderError::MalformedHeader(format!(
                "{} is not an integer: '{}'",
                FIELDS[idx], trimmed
            ))
        })?;

        if value == 0 {
            return Err(LoaderError::MalformedHeader(format!(
                "{} must be positive",
                FIELDS[idx]
            )));
        }

        values[idx] = value;
        idx += 1;
    }

    if values[0] > MAX_STEPS {
        return Err(LoaderError::CapacityExceeded {
            field: "step count",
            value: values[0],
            limit: MAX_STEPS,
        });
    }

    if values[3] > MAX_SAMPLES {
        return Err(LoaderError::CapacityExceeded {
            field: "sample count",
            value: values[3],
            limit: MAX_SAMPLES,
        });
    }

    Ok(CaptureHeader {
        step_count: values[0],
        events_per_step: values[1],
        adc_words_per_step: values[2],
        sample_count: values[3],
    })
}

/// Unpack an event's word sequence into one waveform per channel.
///
/// Word `h * sample_count + s` carries channel `2h` in its low half-word
/// and channel `2h + 1` in its high half-word. Channels with no carrier
/// word (fewer than 32 words per sample) come back zero-filled so every
/// event yields exactly [`NUM_CHANNELS`] waveforms.
fn unpack_event(header: &CaptureHeader, index: usize, words: &[u32]) -> EventRecord {
    let step = index / header.events_per_step;
    let event_in_step = index % header.events_per_step;
    let n = header.sample_count;

    let mut waveforms: Vec<ChannelWaveform> = (0..NUM_CHANNELS)
        .map(|channel| ChannelWaveform {
            channel,
            step,
            event_in_step,
            samples: vec![0u16; n],
        })
        .collect();

    let pairs = header.adc_words_per_step.min(NUM_CHANNELS / 2);
    for h in 0..pairs {
        for s in 0..n {
            let word = words[h * n + s];
            waveforms[2 * h].samples[s] = (word & 0xFFFF) as u16;
            waveforms[2 * h + 1].samples[s] = ((word >> 16) & 0xFFFF) as u16;
        }
    }

    EventRecord {
        index,
        step,
        event_in_step,
        waveforms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_from(text: &str) -> Result<CaptureReader<Cursor<&str>>> {
        CaptureReader::new(Cursor::new(text))
    }

    /// Header: 2 steps x 1 event, 4 words per sample, 2 samples, so each
    /// block is a single 8-token line.
    fn small_capture() -> String {
        let mut text = String::from("2\n1\n4\n2\n");
        for event in 0..2u32 {
            let base = event * 8;
            let words: Vec<String> = (1u32..=8).map(|i| format!("{:08x}", base + i)).collect();
            text.push_str(&words.join(" "));
            text.push_str("\n\n");
        }
        text
    }

    #[test]
    fn test_parse_header() {
        let reader = reader_from("10\n5\n32\n24\n").unwrap();
        let header = *reader.header();
        assert_eq!(header.step_count, 10);
        assert_eq!(header.events_per_step, 5);
        assert_eq!(header.adc_words_per_step, 32);
        assert_eq!(header.sample_count, 24);
        assert_eq!(header.total_events(), 50);
        assert_eq!(header.words_per_event(), 32 * 24);
    }

    #[test]
    fn test_header_skips_blank_lines() {
        let reader = reader_from("\n10\n\n5\n32\n\n\n24\n").unwrap();
        assert_eq!(reader.header().sample_count, 24);
    }

    #[test]
    fn test_malformed_header() {
        assert!(matches!(
            reader_from("10\nfive\n32\n24\n"),
            Err(LoaderError::MalformedHeader(_))
        ));
        assert!(matches!(
            reader_from("10\n5\n"),
            Err(LoaderError::MalformedHeader(_))
        ));
        assert!(matches!(
            reader_from("10\n0\n32\n24\n"),
            Err(LoaderError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_capacity_limits() {
        assert!(matches!(
            reader_from("101\n5\n32\n24\n"),
            Err(LoaderError::CapacityExceeded {
                field: "step count",
                value: 101,
                limit: 100,
            })
        ));
        assert!(matches!(
            reader_from("10\n5\n32\n51\n"),
            Err(LoaderError::CapacityExceeded {
                field: "sample count",
                value: 51,
                limit: 50,
            })
        ));
        // At the limits both values are accepted
        assert!(reader_from("100\n5\n32\n50\n").is_ok());
    }

    #[test]
    fn test_event_blocks_and_addressing() {
        let text = small_capture();
        let events: Vec<_> = reader_from(&text)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(events.len(), 2);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.index, i);
            assert_eq!(event.step, i);
            assert_eq!(event.event_in_step, 0);
            assert_eq!(event.waveforms.len(), NUM_CHANNELS);
            for w in &event.waveforms {
                assert_eq!(w.samples.len(), 2);
            }
        }
    }

    #[test]
    fn test_word_unpacking() {
        // 4 words per sample, 2 samples: word index is h * 2 + s
        let text = "1\n1\n4\n2\n\
                    aabb1122 aabb3344 00010002 00030004 \
                    deadbeef cafe0123 00000000 ffffffff\n\n";
        let events: Vec<_> = reader_from(text)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let event = &events[0];

        // h = 0: 0xaabb1122 (sample 0), 0xaabb3344 (sample 1)
        assert_eq!(event.waveforms[0].samples, vec![0x1122, 0x3344]);
        assert_eq!(event.waveforms[1].samples, vec![0xaabb, 0xaabb]);
        // h = 1: 0x00010002, 0x00030004
        assert_eq!(event.waveforms[2].samples, vec![0x0002, 0x0004]);
        assert_eq!(event.waveforms[3].samples, vec![0x0001, 0x0003]);
        // h = 2: 0xdeadbeef, 0xcafe0123
        assert_eq!(event.waveforms[4].samples, vec![0xbeef, 0x0123]);
        assert_eq!(event.waveforms[5].samples, vec![0xdead, 0xcafe]);
        // Channels with no carrier word are zero-filled
        assert_eq!(event.waveforms[8].samples, vec![0, 0]);
        assert_eq!(event.waveforms[63].samples, vec![0, 0]);

        // Round-trip identity of the half-word split
        let word = 0xaabb1122u32;
        let low = word & 0xFFFF;
        let high = (word >> 16) & 0xFFFF;
        assert_eq!(low | (high << 16), word);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        // Echo lines with other token counts and a non-hex 8-token line
        // are skipped; blank runs collapse to a single terminator.
        let text = "1\n1\n4\n2\n\
                    begin block 0\n\
                    zz zz zz zz zz zz zz zz\n\
                    00000001 00000002 00000003 00000004 00000005 00000006 00000007 00000008\n\
                    end\n\
                    \n\
                    \n\
                    \n";
        let events: Vec<_> = reader_from(text)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].waveforms[0].samples, vec![1, 2]);
    }

    #[test]
    fn test_missing_trailing_blank_flushes_block() {
        let text = "1\n1\n4\n2\n\
                    00000001 00000002 00000003 00000004 00000005 00000006 00000007 00000008";
        let events: Vec<_> = reader_from(text)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_word_count_mismatch_is_recoverable() {
        // First block is one line short; the second is complete.
        let text = "1\n2\n8\n2\n\
                    00000001 00000002 00000003 00000004 00000005 00000006 00000007 00000008\n\n\
                    00000001 00000002 00000003 00000004 00000005 00000006 00000007 00000008\n\
                    00000009 0000000a 0000000b 0000000c 0000000d 0000000e 0000000f 00000010\n\n";
        let results: Vec<_> = reader_from(text).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(LoaderError::MalformedEventBlock {
                event: 0,
                expected: 16,
                found: 8,
            })
        ));
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.waveforms[0].samples, vec![1, 2]);
    }

    #[test]
    fn test_max_sample_and_baseline() {
        let w = ChannelWaveform {
            channel: 0,
            step: 0,
            event_in_step: 0,
            samples: vec![100, 130, 280, 280, 150],
        };
        assert_eq!(w.max_sample(), (2, 280));
        assert_eq!(w.baseline(), 100);
    }
}
