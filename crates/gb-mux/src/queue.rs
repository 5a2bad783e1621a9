//! The small reorder/batch queue sitting between the encoders and the
//! RTMP sink: a timestamp-ordered map that absorbs dts collisions and
//! releases tags in batches.

use std::collections::BTreeMap;

use crate::flv::FlvTag;

const MAX_BUMPS_PER_PUSH: u32 = 10;
const MAX_TOTAL_COLLISIONS: u32 = 100;
const VIDEO_OVERFLOW: u32 = 100;
const AUDIO_OVERFLOW: u32 = 300;

#[derive(Default)]
pub struct ReorderQueue {
    map: BTreeMap<u32, FlvTag>,
    nb_videos: u32,
    nb_audios: u32,
    total_collisions: u32,
}

impl ReorderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nb_videos(&self) -> u32 {
        self.nb_videos
    }

    pub fn nb_audios(&self) -> u32 {
        self.nb_audios
    }

    /// Insert `tag`, bumping its key by 1ms (up to 10 times per push) on
    /// a dts collision. Drops the tag once the queue's lifetime
    /// collision budget of 100 is spent.
    pub fn push(&mut self, tag: FlvTag) {
        let mut key = tag.dts_ms;
        let mut bumps = 0u32;

        while self.map.contains_key(&key) {
            if self.total_collisions >= MAX_TOTAL_COLLISIONS {
                return;
            }
            self.total_collisions += 1;
            bumps += 1;
            if bumps > MAX_BUMPS_PER_PUSH {
                return;
            }
            key = key.wrapping_add(1);
        }

        if tag.is_video {
            self.nb_videos += 1;
        } else {
            self.nb_audios += 1;
        }
        self.map.insert(key, tag);
    }

    /// Whether the batch threshold or an overflow condition is met.
    pub fn ready(&self) -> bool {
        (self.nb_videos >= 2 && self.nb_audios >= 2)
            || self.nb_videos > VIDEO_OVERFLOW
            || self.nb_audios > AUDIO_OVERFLOW
    }

    /// Pop the oldest (lowest-key) tag, if any.
    pub fn pop(&mut self) -> Option<FlvTag> {
        let key = *self.map.keys().next()?;
        let tag = self.map.remove(&key)?;
        if tag.is_video {
            self.nb_videos -= 1;
        } else {
            self.nb_audios -= 1;
        }
        Some(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(dts_ms: u32) -> FlvTag {
        FlvTag { is_video: true, dts_ms, payload: Bytes::new() }
    }

    fn audio(dts_ms: u32) -> FlvTag {
        FlvTag { is_video: false, dts_ms, payload: Bytes::new() }
    }

    #[test]
    fn ready_once_two_of_each_arrive() {
        let mut q = ReorderQueue::new();
        assert!(!q.ready());
        q.push(video(0));
        q.push(audio(1));
        q.push(video(2));
        assert!(!q.ready());
        q.push(audio(3));
        assert!(q.ready());
    }

    #[test]
    fn dequeues_in_timestamp_order() {
        let mut q = ReorderQueue::new();
        q.push(video(50));
        q.push(audio(10));
        q.push(video(30));
        let first = q.pop().unwrap();
        assert_eq!(first.dts_ms, 10);
    }

    #[test]
    fn bumps_colliding_timestamps() {
        let mut q = ReorderQueue::new();
        q.push(video(100));
        q.push(audio(100));
        assert_eq!(q.len(), 2);
        assert!(q.map.contains_key(&100));
        assert!(q.map.contains_key(&101));
    }

    #[test]
    fn overflow_triggers_ready_without_matched_pair() {
        let mut q = ReorderQueue::new();
        for i in 0..=AUDIO_OVERFLOW {
            q.push(audio(i + 1000));
        }
        assert!(q.ready());
    }
}
