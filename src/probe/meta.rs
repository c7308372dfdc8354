//! Per-frame detection metadata carried through the graph.

use smallvec::SmallVec;
use std::borrow::Cow;

/// Normalised RGBA colour, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    /// Red.
    pub red: f64,
    /// Green.
    pub green: f64,
    /// Blue.
    pub blue: f64,
    /// Alpha.
    pub alpha: f64,
}

impl Rgba {
    /// Create a colour.
    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Opaque yellow.
    pub const YELLOW: Rgba = Rgba::new(1.0, 1.0, 0.0, 1.0);

    /// Half-transparent black.
    pub const SHADOW: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.5);
}

/// Font used for overlay labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FontParams {
    /// Font family.
    pub name: Cow<'static, str>,
    /// Point size.
    pub size: u32,
    /// Foreground colour.
    pub color: Rgba,
}

impl Default for FontParams {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("Arial"),
            size: 14,
            color: Rgba::YELLOW,
        }
    }
}

/// Overlay text attached to one detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextParams {
    /// Rendered label; empty means no label.
    pub display_text: String,
    /// Font.
    pub font: FontParams,
    /// Background fill, if enabled.
    pub background: Option<Rgba>,
}

/// Bounding box in frame pixels. Opaque to the annotation logic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    /// Left edge.
    pub left: f32,
    /// Top edge.
    pub top: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

/// One detected object in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    /// Class identifier produced by the detector.
    pub class_id: i32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Geometry.
    pub bbox: BoundingBox,
    /// Mutable overlay text.
    pub text: TextParams,
}

impl DetectionResult {
    /// Create a detection with empty overlay text.
    pub fn new(class_id: i32, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
            ..Default::default()
        }
    }

    /// Attach geometry.
    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }
}

/// One frame of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMeta {
    /// Monotonic sequence number.
    pub frame_num: u64,
    /// Index of the originating source in the batch.
    pub source_id: u32,
    /// Capture time in nanoseconds since the Unix epoch, if the source supplied one.
    pub ntp_timestamp: Option<u64>,
    /// Detections in detector order.
    pub objects: Vec<DetectionResult>,
}

impl FrameMeta {
    /// Create an empty frame.
    pub fn new(frame_num: u64) -> Self {
        Self {
            frame_num,
            ..Default::default()
        }
    }

    /// Set the capture timestamp.
    pub fn with_timestamp(mut self, ns: u64) -> Self {
        self.ntp_timestamp = Some(ns);
        self
    }

    /// Add a detection.
    pub fn with_object(mut self, object: DetectionResult) -> Self {
        self.objects.push(object);
        self
    }
}

/// Ordered frames delivered together by the batcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBatch {
    /// Frames in batch order.
    pub frames: Vec<FrameMeta>,
}

impl FrameBatch {
    /// Create a batch.
    pub fn new(frames: Vec<FrameMeta>) -> Self {
        Self { frames }
    }

    /// Total number of detections across all frames.
    pub fn object_count(&self) -> usize {
        self.frames.iter().map(|f| f.objects.len()).sum()
    }
}

/// One entry of a [`ClassTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    /// Detector class identifier.
    pub id: i32,
    /// Label prefix.
    pub name: Cow<'static, str>,
}

/// Immutable class-id → label table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    entries: SmallVec<[ClassEntry; 4]>,
}

impl ClassTable {
    /// Build a table from `(id, name)` pairs. Later duplicates are ignored.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<Cow<'static, str>>,
    {
        let mut table: SmallVec<[ClassEntry; 4]> = SmallVec::new();
        for (id, name) in entries {
            if table.iter().all(|e| e.id != id) {
                table.push(ClassEntry {
                    id,
                    name: name.into(),
                });
            }
        }
        Self { entries: table }
    }

    /// The four-class traffic detector: vehicle, two-wheeler, person, road sign.
    pub fn default_detector() -> Self {
        Self::new([
            (0, "Vehicle"),
            (1, "TwoWheeler"),
            (2, "Person"),
            (3, "RoadSign"),
        ])
    }

    /// Label for a class id.
    pub fn name(&self, class_id: i32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == class_id)
            .map(|e| e.name.as_ref())
    }

    /// Entries in table order.
    pub fn entries(&self) -> &[ClassEntry] {
        &self.entries
    }

    /// Whether a class id is known.
    pub fn contains(&self, class_id: i32) -> bool {
        self.name(class_id).is_some()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::default_detector()
    }
}

/// Per-frame object counts partitioned by class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectCounts {
    by_class: SmallVec<[(i32, u32); 8]>,
    unknown: u32,
    total: u32,
}

impl ObjectCounts {
    pub(crate) fn record(&mut self, class_id: i32, known: bool) {
        self.total += 1;
        if !known {
            self.unknown += 1;
        }
        match self.by_class.iter_mut().find(|(id, _)| *id == class_id) {
            Some((_, n)) => *n += 1,
            None => self.by_class.push((class_id, 1)),
        }
    }

    /// Count for a class id.
    pub fn get(&self, class_id: i32) -> u32 {
        self.by_class
            .iter()
            .find(|(id, _)| *id == class_id)
            .map_or(0, |(_, n)| *n)
    }

    /// Detections whose class is not in the table.
    pub fn unknown(&self) -> u32 {
        self.unknown
    }

    /// All detections.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// `(class_id, count)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u32)> + '_ {
        self.by_class.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detector_table() {
        let table = ClassTable::default_detector();
        assert_eq!(table.name(0), Some("Vehicle"));
        assert_eq!(table.name(1), Some("TwoWheeler"));
        assert_eq!(table.name(2), Some("Person"));
        assert_eq!(table.name(3), Some("RoadSign"));
        assert_eq!(table.name(7), None);
    }

    #[test]
    fn test_table_ignores_duplicate_ids() {
        let table = ClassTable::new([(5, "Dog"), (5, "Cat")]);
        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.name(5), Some("Dog"));
    }

    #[test]
    fn test_object_counts() {
        let mut counts = ObjectCounts::default();
        counts.record(0, true);
        counts.record(0, true);
        counts.record(9, false);
        assert_eq!(counts.get(0), 2);
        assert_eq!(counts.get(2), 0);
        assert_eq!(counts.unknown(), 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_batch_object_count() {
        let batch = FrameBatch::new(vec![
            FrameMeta::new(0).with_object(DetectionResult::new(0, 0.5)),
            FrameMeta::new(1),
            FrameMeta::new(2)
                .with_object(DetectionResult::new(2, 0.7))
                .with_object(DetectionResult::new(3, 0.9)),
        ]);
        assert_eq!(batch.object_count(), 3);
    }
}
