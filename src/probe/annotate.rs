//! Detection annotation probe.
//!
//! Rewrites each detection's overlay text to `"<Class> <confidence>"` with
//! a fixed label style, counts objects per class, and optionally reports
//! capture timestamps on a dedicated tracing target.

use super::meta::{ClassTable, FontParams, FrameBatch, FrameMeta, ObjectCounts, Rgba};
use super::{BufferProbe, PadProbeReturn, ProbeInfo};
use chrono::DateTime;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracing target for capture-timestamp diagnostics.
pub const TIMESTAMP_TARGET: &str = "vidgraph::timestamp";

/// Presentation attributes applied to every label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStyle {
    /// Font and foreground colour.
    pub font: FontParams,
    /// Background fill.
    pub background: Option<Rgba>,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            font: FontParams::default(),
            background: Some(Rgba::SHADOW),
        }
    }
}

/// Running totals of an [`AnnotationProbe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    /// Batches seen.
    pub batches: u64,
    /// Frames seen.
    pub frames: u64,
    /// Detections seen.
    pub objects: u64,
    /// Detections labelled.
    pub labelled: u64,
}

/// Probe that labels detections for the overlay renderer.
#[derive(Debug)]
pub struct AnnotationProbe {
    classes: ClassTable,
    style: LabelStyle,
    report_timestamps: bool,
    batches: AtomicU64,
    frames: AtomicU64,
    objects: AtomicU64,
    labelled: AtomicU64,
}

impl AnnotationProbe {
    /// Create a probe with the default label style.
    pub fn new(classes: ClassTable) -> Self {
        Self {
            classes,
            style: LabelStyle::default(),
            report_timestamps: false,
            batches: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            objects: AtomicU64::new(0),
            labelled: AtomicU64::new(0),
        }
    }

    /// Override the label style.
    pub fn with_style(mut self, style: LabelStyle) -> Self {
        self.style = style;
        self
    }

    /// Enable capture-timestamp reporting.
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.report_timestamps = enabled;
        self
    }

    /// Class table in use.
    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Whether timestamps are reported.
    pub fn reports_timestamps(&self) -> bool {
        self.report_timestamps
    }

    /// Annotate one frame in place and return its per-class counts.
    ///
    /// Labels are rebuilt from `(class_id, confidence)` on every call, so
    /// repeated runs produce the same text. Detections of unknown classes
    /// are counted and left untouched.
    pub fn annotate_frame(&self, frame: &mut FrameMeta) -> ObjectCounts {
        let mut counts = ObjectCounts::default();
        let mut labelled = 0;

        for object in &mut frame.objects {
            let Some(name) = self.classes.name(object.class_id) else {
                counts.record(object.class_id, false);
                continue;
            };
            counts.record(object.class_id, true);

            let text = &mut object.text;
            text.display_text.clear();
            // Writing into a String cannot fail.
            let _ = write!(text.display_text, "{} {:.2}", name, object.confidence);
            text.font.clone_from(&self.style.font);
            text.background = self.style.background;
            labelled += 1;
        }

        self.frames.fetch_add(1, Ordering::Relaxed);
        self.objects
            .fetch_add(u64::from(counts.total()), Ordering::Relaxed);
        self.labelled.fetch_add(labelled, Ordering::Relaxed);
        counts
    }

    /// Annotate every frame of a batch.
    pub fn annotate_batch(&self, batch: &mut FrameBatch) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        for frame in &mut batch.frames {
            let counts = self.annotate_frame(frame);
            tracing::trace!(
                frame = frame.frame_num,
                source = frame.source_id,
                objects = counts.total(),
                unknown = counts.unknown(),
                "annotated frame"
            );

            if self.report_timestamps {
                self.report_timestamp(frame);
            }
        }
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> ProbeStats {
        ProbeStats {
            batches: self.batches.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            objects: self.objects.load(Ordering::Relaxed),
            labelled: self.labelled.load(Ordering::Relaxed),
        }
    }

    fn report_timestamp(&self, frame: &FrameMeta) {
        match frame.ntp_timestamp.and_then(format_capture_time) {
            Some(utc) => tracing::info!(
                target: TIMESTAMP_TARGET,
                frame = frame.frame_num,
                source = frame.source_id,
                utc = %utc,
                "capture time"
            ),
            None => tracing::debug!(
                target: TIMESTAMP_TARGET,
                frame = frame.frame_num,
                "no usable capture timestamp"
            ),
        }
    }
}

impl Default for AnnotationProbe {
    fn default() -> Self {
        Self::new(ClassTable::default_detector())
    }
}

impl BufferProbe for AnnotationProbe {
    fn on_buffer(&self, info: &mut ProbeInfo<'_>) -> PadProbeReturn {
        self.annotate_batch(info.batch);
        PadProbeReturn::Pass
    }
}

/// Format nanoseconds since the Unix epoch as `YYYY-MM-DD HH:MM:SS` UTC.
///
/// Returns `None` for zero (no timestamp attached) and for values outside
/// the representable calendar range.
pub fn format_capture_time(ns: u64) -> Option<String> {
    if ns == 0 {
        return None;
    }
    let secs = i64::try_from(ns / 1_000_000_000).ok()?;
    let nanos = u32::try_from(ns % 1_000_000_000).ok()?;
    DateTime::from_timestamp(secs, nanos).map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::DetectionResult;

    fn frame(objects: &[(i32, f32)]) -> FrameMeta {
        objects
            .iter()
            .fold(FrameMeta::new(7), |f, &(id, conf)| {
                f.with_object(DetectionResult::new(id, conf))
            })
    }

    #[test]
    fn test_two_vehicles() {
        let probe = AnnotationProbe::default();
        let mut frame = frame(&[(0, 0.87), (0, 0.91)]);

        let counts = probe.annotate_frame(&mut frame);

        assert_eq!(frame.objects[0].text.display_text, "Vehicle 0.87");
        assert_eq!(frame.objects[1].text.display_text, "Vehicle 0.91");
        assert_eq!(counts.get(0), 2);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_label_style_applied() {
        let probe = AnnotationProbe::default();
        let mut frame = frame(&[(2, 0.5)]);
        probe.annotate_frame(&mut frame);

        let text = &frame.objects[0].text;
        assert_eq!(text.display_text, "Person 0.50");
        assert_eq!(text.font.name, "Arial");
        assert_eq!(text.font.size, 14);
        assert_eq!(text.font.color, Rgba::YELLOW);
        assert_eq!(text.background, Some(Rgba::SHADOW));
    }

    #[test]
    fn test_idempotent() {
        let probe = AnnotationProbe::default();
        let mut frame = frame(&[(1, 0.333), (3, 0.999)]);

        probe.annotate_frame(&mut frame);
        let first = frame.clone();
        probe.annotate_frame(&mut frame);

        assert_eq!(frame, first);
        assert_eq!(frame.objects[0].text.display_text, "TwoWheeler 0.33");
        assert_eq!(frame.objects[1].text.display_text, "RoadSign 1.00");
    }

    #[test]
    fn test_unknown_class_untouched() {
        let probe = AnnotationProbe::default();
        let mut frame = frame(&[(42, 0.75), (0, 0.6)]);

        let counts = probe.annotate_frame(&mut frame);

        assert_eq!(frame.objects.len(), 2);
        assert!(frame.objects[0].text.display_text.is_empty());
        assert_eq!(frame.objects[0].text.background, None);
        assert_eq!(counts.unknown(), 1);
        assert_eq!(counts.get(42), 1);
        assert_eq!(frame.objects[1].text.display_text, "Vehicle 0.60");
    }

    #[test]
    fn test_batch_passes_and_keeps_frames() {
        let probe = AnnotationProbe::default().with_timestamps(true);
        let mut batch = FrameBatch::new(vec![
            frame(&[(0, 0.5)]).with_timestamp(1_700_000_000_000_000_000),
            FrameMeta::new(8),
            frame(&[(9, 0.1)]).with_timestamp(u64::MAX),
        ]);
        let before: Vec<_> = batch.frames.iter().map(|f| f.frame_num).collect();

        let mut info = ProbeInfo {
            stage: "primary-inference",
            pad: "src",
            batch: &mut batch,
        };
        assert_eq!(probe.on_buffer(&mut info), PadProbeReturn::Pass);

        let after: Vec<_> = batch.frames.iter().map(|f| f.frame_num).collect();
        assert_eq!(before, after);
        assert_eq!(
            probe.stats(),
            ProbeStats {
                batches: 1,
                frames: 3,
                objects: 2,
                labelled: 1,
            }
        );
    }

    #[test]
    fn test_format_capture_time() {
        assert_eq!(
            format_capture_time(1_700_000_000_123_456_789).as_deref(),
            Some("2023-11-14 22:13:20")
        );
        assert_eq!(format_capture_time(0), None);
        assert_eq!(format_capture_time(u64::MAX).as_deref(), Some("2554-07-21 23:34:33"));
    }
}
