use std::{
    collections::HashMap,
    fmt::{self, Write},
    time::{Duration, Instant},
};

use crate::floating_type_mod::FT;

#[derive(Clone)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T: Copy> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn last(&self) -> Option<T> {
        self.values.last().copied()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }
    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::MAX, FT::min)
    }
    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::MIN, FT::max)
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    fn end_add_to_last(&mut self) {
        let duration = Instant::now() - self.last_start;
        match self.values.last_mut() {
            Some(last) => *last += duration,
            None => self.values.push(duration),
        }
    }

    pub fn avg(&self) -> Duration {
        self.sum() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }
}

/// Named series of per-step values (particle count, average density, ...).
pub struct ValueCounters {
    counters: HashMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }
}

/// Wall time per named solver phase.
pub struct PerformanceCounters {
    counters: HashMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    pub fn end(&mut self, id: &str) {
        if let Some(counter) = self.counters.get_mut(id) {
            counter.end();
        }
    }

    /// Adds the time since the last `begin` to the last recorded value
    /// (for phases that run several times per step).
    pub fn end_add_to_last(&mut self, id: &str) {
        if let Some(counter) = self.counters.get_mut(id) {
            counter.end_add_to_last();
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }
}

pub fn write_statistics(pcounters: &PerformanceCounters, vcounters: &ValueCounters) -> Result<String, fmt::Error> {
    let mut s = String::new();

    if let Some(step) = pcounters.get("simulation-step") {
        writeln!(
            s,
            "simulation-time: {:.3}ms ({} steps)",
            step.sum().as_secs_f64() * 1000.,
            step.len()
        )?;
        writeln!(s)?;
    }

    let mut v = pcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, pcounter) in v {
        writeln!(s, "{}: avg:{:.4}ms", label, pcounter.avg().as_secs_f64() * 1000.)?;
    }
    writeln!(s)?;

    let mut v = vcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, vcounter) in v {
        writeln!(
            s,
            "{}: min:{} max:{} avg:{}",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        )?;
    }

    Ok(s)
}

#[test]
fn disabled_counters_record_nothing() {
    let mut pcounters = PerformanceCounters::new(false);
    let mut vcounters = ValueCounters::new(false);
    pcounters.begin("density");
    pcounters.end("density");
    vcounters.add_value("particle-count", 3.);
    assert!(pcounters.get("density").is_none());
    assert!(vcounters.get("particle-count").is_none());
}

#[test]
fn statistics_list_all_counters() {
    let mut pcounters = PerformanceCounters::new(true);
    let mut vcounters = ValueCounters::new(true);
    for i in 0..3 {
        pcounters.begin("simulation-step");
        pcounters.begin("density");
        pcounters.end("density");
        pcounters.begin("density");
        pcounters.end_add_to_last("density");
        pcounters.end("simulation-step");
        vcounters.add_value("max-speed", i as FT);
    }

    assert_eq!(pcounters.get("density").map(|c| c.len()), Some(3));
    let max_speed = vcounters.get("max-speed").unwrap();
    assert_eq!(max_speed.min(), 0.);
    assert_eq!(max_speed.max(), 2.);
    assert_eq!(max_speed.avg(), 1.);
    assert_eq!(max_speed.last(), Some(2.));

    let s = write_statistics(&pcounters, &vcounters).unwrap();
    assert!(s.contains("(3 steps)"));
    assert!(s.contains("density: avg:"));
    assert!(s.contains("max-speed: min:0 max:2 avg:1"));
}
