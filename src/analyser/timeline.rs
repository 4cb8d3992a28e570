//! Buckets packets into adaptive, fixed-width time windows.
use serde::Serialize;
use std::collections::BTreeMap;
use super::containers::PacketRecord;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimeBucket {
    pub start: f64,
    pub packet_count: usize,
    pub bytes: u64,
    pub protocols: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub bucket_width: f64,
    /// Number of buckets covering `[start, end]`, empty ones included.
    pub bucket_count: usize,
    /// Non-empty buckets only, in time order.
    pub buckets: Vec<TimeBucket>,
}

impl Timeline {
    /// Every bucket in range, with empty windows filled in as zero.
    pub fn dense(&self) -> Vec<TimeBucket> {
        let mut dense: Vec<TimeBucket> = (0..self.bucket_count)
            .map(|i| TimeBucket {
                start: self.start + i as f64 * self.bucket_width,
                ..Default::default()
            })
            .collect();

        for bucket in &self.buckets {
            let index = ((bucket.start - self.start) / self.bucket_width).round() as usize;
            if let Some(slot) = dense.get_mut(index) {
                *slot = bucket.clone();
            }
        }
        dense
    }
}

/// Width of each bucket: the capture split into at most `max_buckets` windows, never narrower than 1.
pub fn bucket_width(duration: f64, max_buckets: usize) -> f64 {
    (duration / max_buckets.max(1) as f64).max(1.0)
}

/// Index of the bucket holding an offset from the capture start.
///
/// Clamped so that a packet exactly at the capture end lands in the last bucket.
fn bucket_index(offset: f64, width: f64, count: usize) -> usize {
    let index = (offset / width).floor().max(0.0) as usize;
    index.min(count.saturating_sub(1))
}

/// Builds the sparse timeline. Packets with a non-finite timestamp are ignored.
///
/// Timestamps need not be sorted; start and end are the minimum and maximum seen.
pub fn build_timeline(packets: &[PacketRecord], max_buckets: usize) -> Timeline {
    log::info!("Building traffic timeline.");
    let timed: Vec<&PacketRecord> = packets.iter().filter(|p| p.has_timestamp()).collect();
    if timed.is_empty() {
        return Timeline::default();
    }

    let start = timed.iter().map(|p| p.timestamp).fold(f64::INFINITY, f64::min);
    let end = timed.iter().map(|p| p.timestamp).fold(f64::NEG_INFINITY, f64::max);
    let duration = end - start;
    let width = bucket_width(duration, max_buckets);
    // duration / width can land just above the cap after rounding
    let count = ((duration / width).ceil() as usize).clamp(1, max_buckets.max(1));

    let mut buckets: BTreeMap<usize, TimeBucket> = BTreeMap::new();
    for packet in timed {
        let index = bucket_index(packet.timestamp - start, width, count);
        let bucket = buckets.entry(index).or_insert_with(|| TimeBucket {
            start: start + index as f64 * width,
            ..Default::default()
        });
        bucket.packet_count += 1;
        bucket.bytes += packet.length;
        *bucket.protocols.entry(packet.protocol_label().to_string()).or_insert(0) += 1;
    }

    Timeline {
        start,
        end,
        duration,
        bucket_width: width,
        bucket_count: count,
        buckets: buckets.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::case;

    #[case(250.0, 100, 2.5; "long capture")]
    #[case(0.4, 100, 1.0; "sub-second capture")]
    #[case(0.0, 100, 1.0; "single instant")]
    #[case(60.0, 10, 6.0; "custom cap")]
    fn width_adapts_to_duration(duration: f64, max: usize, expected: f64) {
        assert_eq!(bucket_width(duration, max), expected);
    }

    #[test]
    fn uniform_capture_stays_within_cap() {
        let packets: Vec<PacketRecord> = (0..=250).map(|i| PacketRecord::new(i, i as f64, 100)).collect();
        let timeline = build_timeline(&packets, 100);

        assert_eq!(timeline.bucket_width, 2.5);
        assert_eq!(timeline.duration, 250.0);
        assert_eq!(timeline.bucket_count, 100);
        assert!(timeline.buckets.len() <= 100);
        let total: usize = timeline.buckets.iter().map(|b| b.packet_count).sum();
        assert_eq!(total, 251);
    }

    #[test]
    fn inexact_durations_never_exceed_cap() {
        let packets: Vec<PacketRecord> = (0..=1000).map(|i| PacketRecord::new(i, i as f64 * 0.100008, 60)).collect();
        let timeline = build_timeline(&packets, 100);
        assert_eq!(timeline.bucket_count, 100);
        assert_eq!(timeline.buckets.len(), 100);
        assert_eq!(timeline.buckets.iter().map(|b| b.packet_count).sum::<usize>(), 1001);

        for step in 0..2000 {
            let duration = 100.001 + step as f64 * 1.000_37;
            for cap in [10, 100] {
                let packets = vec![PacketRecord::new(0, 0.0, 60), PacketRecord::new(1, duration, 60)];
                let timeline = build_timeline(&packets, cap);
                assert!(timeline.bucket_count <= cap, "{duration} gave {} buckets", timeline.bucket_count);
                assert_eq!(timeline.dense().last().map(|b| b.packet_count), Some(1));
            }
        }
    }

    #[test]
    fn end_packet_lands_in_last_bucket() {
        let packets = vec![PacketRecord::new(0, 10.0, 60), PacketRecord::new(1, 20.0, 60)];
        let timeline = build_timeline(&packets, 100);

        assert_eq!(timeline.bucket_count, 10);
        assert_eq!(timeline.buckets.len(), 2);
        assert_eq!(timeline.buckets[1].start, 19.0);
    }

    #[test]
    fn unordered_timestamps_are_tolerated() {
        let packets = vec![
            PacketRecord::new(0, 5.0, 10),
            PacketRecord::new(1, 1.0, 20),
            PacketRecord::new(2, f64::NAN, 30),
        ];
        let timeline = build_timeline(&packets, 100);

        assert_eq!((timeline.start, timeline.end), (1.0, 5.0));
        assert_eq!(timeline.buckets[0].bytes, 20);
        assert_eq!(timeline.buckets[0].protocols["OTHER"], 1);
    }

    #[test]
    fn no_timestamps_gives_empty_timeline() {
        let packets = vec![PacketRecord::new(0, f64::NAN, 60)];
        assert_eq!(build_timeline(&packets, 100), Timeline::default());
        assert_eq!(build_timeline(&[], 100), Timeline::default());
    }

    #[test]
    fn dense_fills_gaps() {
        let packets = vec![PacketRecord::new(0, 0.0, 60), PacketRecord::new(1, 3.5, 60)];
        let timeline = build_timeline(&packets, 100);
        let dense = timeline.dense();

        assert_eq!(dense.len(), 4);
        assert_eq!(dense.iter().map(|b| b.packet_count).collect::<Vec<_>>(), vec![1, 0, 0, 1]);
    }
}
