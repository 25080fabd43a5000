use relief_core::{ReliefError, ReliefResult, Transform3D};
use serde::{Deserialize, Serialize};

/// A named pose at a point in animation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub name: String,
    /// Seconds from the start of the animation.
    pub time: f64,
    pub transform: Transform3D,
}

/// Keyframes kept sorted by time; names are unique within a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyframeTrack {
    keyframes: Vec<Keyframe>,
}

impl KeyframeTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn get(&self, name: &str) -> Option<&Keyframe> {
        self.keyframes.iter().find(|k| k.name == name)
    }

    /// Insert a keyframe, replacing any existing one with the same name.
    /// Equal times keep insertion order.
    pub fn insert(&mut self, keyframe: Keyframe) -> ReliefResult<()> {
        if !(keyframe.time.is_finite() && keyframe.time >= 0.0) {
            return Err(ReliefError::validation(format!(
                "keyframe '{}' time {} must be finite and non-negative",
                keyframe.name, keyframe.time
            )));
        }
        self.keyframes.retain(|k| k.name != keyframe.name);
        let at = self
            .keyframes
            .partition_point(|k| k.time <= keyframe.time);
        self.keyframes.insert(at, keyframe);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Keyframe> {
        let idx = self.keyframes.iter().position(|k| k.name == name)?;
        Some(self.keyframes.remove(idx))
    }

    /// Evaluate the track at `time`. Clamps to the first/last keyframe outside
    /// the keyframed range; `None` for an empty track.
    pub fn sample(&self, time: f64) -> Option<Transform3D> {
        let first = self.keyframes.first()?;
        if time <= first.time {
            return Some(first.transform);
        }
        let last = &self.keyframes[self.keyframes.len() - 1];
        if time >= last.time {
            return Some(last.transform);
        }

        for pair in self.keyframes.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if time >= a.time && time <= b.time {
                let span = b.time - a.time;
                if span == 0.0 {
                    return Some(b.transform);
                }
                return Some(a.transform.interpolate(&b.transform, (time - a.time) / span));
            }
        }
        Some(last.transform)
    }

    pub fn duration(&self) -> f64 {
        match (self.keyframes.first(), self.keyframes.last()) {
            (Some(a), Some(b)) => b.time - a.time,
            _ => 0.0,
        }
    }
}
