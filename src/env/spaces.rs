use bytes::Bytes;
use rand::Rng;

use crate::error::{Error, Result};
use crate::mission::VideoGeometry;

/// A `Discrete(n)` space indexing into a list of command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpace {
    actions: Vec<String>,
}

impl ActionSpace {
    pub fn new(actions: Vec<String>) -> Self {
        Self { actions }
    }

    pub fn n(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.actions.len()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.actions.get(index).map(String::as_str)
    }

    /// Command text for an action index.
    pub fn command(&self, index: usize) -> Result<&str> {
        self.get(index).ok_or(Error::InvalidAction { index, size: self.actions.len() })
    }

    pub fn position(&self, command: &str) -> Option<usize> {
        self.actions.iter().position(|a| a == command)
    }

    /// Uniformly random action index, `None` for an empty space.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        if self.actions.is_empty() {
            None
        } else {
            Some(rng.gen_range(0..self.actions.len()))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }
}

/// How observation bytes are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One dimension of `width * height * depth` bytes.
    Flat,
    /// Height x width x depth, row-major.
    Hwc,
}

/// Box space of `u8` video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationSpace {
    pub geometry: VideoGeometry,
    pub layout: Layout,
}

impl ObservationSpace {
    pub const LOW: u8 = 0;
    pub const HIGH: u8 = 255;

    pub fn new(geometry: VideoGeometry, layout: Layout) -> Self {
        Self { geometry, layout }
    }

    pub fn shape(&self) -> Vec<usize> {
        let VideoGeometry { width, height, depth } = self.geometry;
        match self.layout {
            Layout::Flat => vec![width * height * depth],
            Layout::Hwc => vec![height, width, depth],
        }
    }

    pub fn contains(&self, obs: &Observation) -> bool {
        obs.geometry == self.geometry && obs.len() == self.geometry.frame_len()
    }

    pub fn zeros(&self) -> Observation {
        Observation::zeros(self.geometry, self.layout)
    }

    /// Wrap a received frame. An empty frame becomes all zeros.
    pub fn observation(&self, frame: Bytes) -> Result<Observation> {
        if frame.is_empty() {
            return Ok(self.zeros());
        }
        if self.layout == Layout::Hwc && frame.len() != self.geometry.frame_len() {
            return Err(Error::UnexpectedReply {
                request: "observation",
                expected: self.geometry.frame_len(),
                actual: frame.len(),
            });
        }
        Ok(Observation { data: frame, geometry: self.geometry, layout: self.layout })
    }
}

/// A video frame of `u8` samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    data: Bytes,
    geometry: VideoGeometry,
    layout: Layout,
}

impl Observation {
    pub fn zeros(geometry: VideoGeometry, layout: Layout) -> Self {
        Self {
            data: Bytes::from(vec![0u8; geometry.frame_len()]),
            geometry,
            layout,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self.layout {
            Layout::Flat => vec![self.data.len()],
            Layout::Hwc => vec![self.geometry.height, self.geometry.width, self.geometry.depth],
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn geometry(&self) -> VideoGeometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Sample at `(row, col, channel)`, counting rows from the top of the frame.
    pub fn pixel(&self, row: usize, col: usize, channel: usize) -> Option<u8> {
        let VideoGeometry { width, height, depth } = self.geometry;
        if row >= height || col >= width || channel >= depth {
            return None;
        }
        self.data.get((row * width + col) * depth + channel).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const GEOMETRY: VideoGeometry = VideoGeometry { width: 4, height: 2, depth: 3 };

    #[test]
    fn test_action_space_lookup() {
        let space = ActionSpace::new(vec!["move 1".into(), "turn -1".into()]);
        assert_eq!(space.n(), 2);
        assert_eq!(space.command(1).unwrap(), "turn -1");
        assert_eq!(space.position("move 1"), Some(0));
        let err = space.command(2).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { index: 2, size: 2 }));
    }

    #[test]
    fn test_action_space_sample_in_range() {
        let space = ActionSpace::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(space.contains(space.sample(&mut rng).unwrap()));
        }
        assert!(ActionSpace::new(Vec::new()).sample(&mut rng).is_none());
    }

    #[test]
    fn test_empty_frame_becomes_zeros() {
        let space = ObservationSpace::new(GEOMETRY, Layout::Hwc);
        let obs = space.observation(Bytes::new()).unwrap();
        assert_eq!(obs.shape(), vec![2, 4, 3]);
        assert_eq!(obs.len(), 24);
        assert!(obs.as_bytes().iter().all(|&b| b == 0));
        assert!(space.contains(&obs));
    }

    #[test]
    fn test_reshaped_frame_must_match_geometry() {
        let space = ObservationSpace::new(GEOMETRY, Layout::Hwc);
        assert!(space.observation(Bytes::from(vec![1u8; 23])).is_err());

        let flat = ObservationSpace::new(GEOMETRY, Layout::Flat);
        let obs = flat.observation(Bytes::from(vec![1u8; 23])).unwrap();
        assert_eq!(obs.shape(), vec![23]);
        assert!(!flat.contains(&obs));
    }

    #[test]
    fn test_pixel_indexing() {
        let frame: Vec<u8> = (0..24).collect();
        let space = ObservationSpace::new(GEOMETRY, Layout::Hwc);
        let obs = space.observation(Bytes::from(frame)).unwrap();
        assert_eq!(obs.pixel(0, 0, 0), Some(0));
        assert_eq!(obs.pixel(0, 1, 2), Some(5));
        assert_eq!(obs.pixel(1, 3, 2), Some(23));
        assert_eq!(obs.pixel(2, 0, 0), None);
    }
}
