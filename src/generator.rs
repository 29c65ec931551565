use std::io::BufRead;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::GeneratorConfig;
use crate::model::tick::{RawTick, Tick};

/// Infinite, non-restartable source of ticks. Each call advances internal state.
///
/// `None` means no tick is available right now; callers keep polling unless
/// [`TickGenerator::is_exhausted`] reports the source has ended.
pub trait TickGenerator: Send {
    fn next_tick(&mut self) -> Option<Tick>;

    fn is_exhausted(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub enum TimestampSource {
    Wall,
    Stepped { next: DateTime<Utc>, step: Duration },
}

impl TimestampSource {
    pub fn stepped(start: DateTime<Utc>, step: Duration) -> Self {
        Self::Stepped { next: start, step }
    }

    fn advance(&mut self) -> DateTime<Utc> {
        match self {
            Self::Wall => Utc::now(),
            Self::Stepped { next, step } => {
                let ts = *next;
                *next = ts + *step;
                ts
            }
        }
    }
}

/// Synthetic quotes: a uniformly chosen symbol, a price rounded to cents and an
/// integer volume, both drawn uniformly from the configured ranges.
pub struct RandomTickGenerator {
    symbols: Vec<String>,
    price_min: f64,
    price_max: f64,
    volume_min: i64,
    volume_max: i64,
    rng: StdRng,
    clock: TimestampSource,
}

impl RandomTickGenerator {
    pub fn from_config(cfg: &GeneratorConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            symbols: cfg.normalized_symbols(),
            price_min: cfg.price_min,
            price_max: cfg.price_max,
            volume_min: cfg.volume_min,
            volume_max: cfg.volume_max,
            rng,
            clock: TimestampSource::Wall,
        }
    }

    pub fn with_clock(mut self, clock: TimestampSource) -> Self {
        self.clock = clock;
        self
    }
}

impl TickGenerator for RandomTickGenerator {
    fn next_tick(&mut self) -> Option<Tick> {
        let symbol = self.symbols.choose(&mut self.rng)?.clone();
        let price = self.rng.gen_range(self.price_min..=self.price_max);
        let price = (price * 100.0).round() / 100.0;
        let volume = self.rng.gen_range(self.volume_min..=self.volume_max);
        Some(Tick::new(symbol, self.clock.advance(), price, volume))
    }
}

/// Replays JSON-lines records (`{"symbol","timestamp","price","volume"}`).
/// Malformed records are logged and skipped.
pub struct ReplayGenerator<R> {
    lines: std::io::Lines<R>,
    exhausted: bool,
    line_no: usize,
    rejected: usize,
}

impl<R: BufRead> ReplayGenerator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            exhausted: false,
            line_no: 0,
            rejected: 0,
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl<R: BufRead + Send> TickGenerator for ReplayGenerator<R> {
    fn next_tick(&mut self) -> Option<Tick> {
        if self.exhausted {
            return None;
        }
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, line = self.line_no + 1, "Replay source read failed");
                    self.exhausted = true;
                    return None;
                }
                None => {
                    self.exhausted = true;
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match RawTick::from_json(&line).and_then(Tick::try_from) {
                Ok(tick) => return Some(tick),
                Err(e) => {
                    self.rejected += 1;
                    tracing::warn!(error = %e, line = self.line_no, "Discarding malformed tick record");
                }
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
