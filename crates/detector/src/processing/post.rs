use crate::detection::{BoundingBox, Detection};
use crate::labels::label_for;
use ndarray::ArrayViewD;

/// Maps model-input coordinates back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    /// COCO ids to keep; empty keeps all.
    pub classes: Vec<u16>,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, classes: Vec<u16>, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            classes,
            max_detections,
        }
    }

    /// Parse detections from RF-DETR output, in query order.
    #[tracing::instrument(skip(self, dets, logits, transform))]
    pub fn parse_detections(
        &self,
        dets: &ArrayViewD<f32>,   // [1, queries, 4] - boxes in cxcywh format (normalized 0-1)
        logits: &ArrayViewD<f32>, // [1, queries, classes] - class logits
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<Detection>> {
        if dets.ndim() != 3 || dets.shape()[2] != 4 {
            anyhow::bail!("Unexpected box output shape {:?}", dets.shape());
        }
        if logits.ndim() != 3 || logits.shape()[1] != dets.shape()[1] {
            anyhow::bail!(
                "Logits shape {:?} does not match boxes {:?}",
                logits.shape(),
                dets.shape()
            );
        }

        let num_queries = dets.shape()[1];
        let num_classes = logits.shape()[2];
        if num_classes < 2 {
            anyhow::bail!("Model reports {} classes, need at least 2", num_classes);
        }

        let mut detections = Vec::new();

        for i in 0..num_queries {
            // Slot 0 is background; real classes start at 1
            let mut max_logit = f32::NEG_INFINITY;
            let mut class_idx = 1usize;
            for c in 1..num_classes {
                let logit = logits[[0, i, c]];
                if logit > max_logit {
                    max_logit = logit;
                    class_idx = c;
                }
            }

            let confidence = sigmoid(max_logit);
            if confidence < self.confidence_threshold {
                continue;
            }

            let class_id = (class_idx - 1) as u16;
            if !self.classes.is_empty() && !self.classes.contains(&class_id) {
                continue;
            }

            let (x1_norm, y1_norm, x2_norm, y2_norm) = cxcywh_to_xyxy(
                dets[[0, i, 0]],
                dets[[0, i, 1]],
                dets[[0, i, 2]],
                dets[[0, i, 3]],
            );

            let x1 = to_source(x1_norm, transform.input_width, transform.offset_x, transform);
            let y1 = to_source(y1_norm, transform.input_height, transform.offset_y, transform);
            let x2 = to_source(x2_norm, transform.input_width, transform.offset_x, transform);
            let y2 = to_source(y2_norm, transform.input_height, transform.offset_y, transform);

            let x1 = x1.clamp(0.0, transform.orig_width as f32);
            let x2 = x2.clamp(0.0, transform.orig_width as f32);
            let y1 = y1.clamp(0.0, transform.orig_height as f32);
            let y2 = y2.clamp(0.0, transform.orig_height as f32);

            let bbox = BoundingBox::from_corners(x1, y1, x2, y2);
            if bbox.area() <= 0.0 {
                continue;
            }

            detections.push(Detection {
                class_id,
                label: label_for(class_id),
                confidence,
                bbox,
            });
        }

        Ok(self.cap(detections))
    }

    /// Keep the `max_detections` most confident, preserving query order.
    fn cap(&self, detections: Vec<Detection>) -> Vec<Detection> {
        if detections.len() <= self.max_detections {
            return detections;
        }

        let mut ranked: Vec<usize> = (0..detections.len()).collect();
        ranked.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .total_cmp(&detections[a].confidence)
                .then(a.cmp(&b))
        });
        let mut keep = vec![false; detections.len()];
        for &idx in ranked.iter().take(self.max_detections) {
            keep[idx] = true;
        }

        detections
            .into_iter()
            .zip(keep)
            .filter_map(|(det, keep)| keep.then_some(det))
            .collect()
    }
}

#[inline]
fn to_source(normalized: f32, input_extent: u32, offset: f32, transform: &TransformParams) -> f32 {
    (normalized * input_extent as f32 - offset) / transform.scale
}

/// Sigmoid activation function
#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn test_postprocessor() -> PostProcessor {
        PostProcessor::new(0.7, Vec::new(), 1000)
    }

    fn test_transform(
        orig_width: u32,
        orig_height: u32,
        scale: f32,
        offset_x: f32,
        offset_y: f32,
    ) -> TransformParams {
        TransformParams {
            orig_width,
            orig_height,
            input_width: 512,
            input_height: 512,
            scale,
            offset_x,
            offset_y,
        }
    }

    /// Build dets [1, n, 4] and logits [1, n, num_classes].
    ///
    /// Class indices are model slots: slot = coco_id + 1.
    fn model_output(
        boxes_cxcywh: Vec<[f32; 4]>,
        class_logits: Vec<(usize, f32)>,
        num_classes: usize,
    ) -> (Array<f32, IxDyn>, Array<f32, IxDyn>) {
        let n = boxes_cxcywh.len();

        let dets_data: Vec<f32> = boxes_cxcywh.iter().flatten().copied().collect();
        let dets = Array::from_shape_vec(IxDyn(&[1, n, 4]), dets_data).unwrap();

        let mut logits_data = vec![-10.0f32; n * num_classes];
        for (i, (slot, logit_value)) in class_logits.iter().enumerate() {
            logits_data[i * num_classes + slot] = *logit_value;
        }
        let logits = Array::from_shape_vec(IxDyn(&[1, n, num_classes]), logits_data).unwrap();

        (dets, logits)
    }

    fn parse(
        post: &PostProcessor,
        dets: &Array<f32, IxDyn>,
        logits: &Array<f32, IxDyn>,
        transform: &TransformParams,
    ) -> Vec<Detection> {
        post.parse_detections(&dets.view(), &logits.view(), transform)
            .unwrap()
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_cxcywh_to_xyxy() {
        let (x1, y1, x2, y2) = cxcywh_to_xyxy(0.5, 0.5, 0.4, 0.2);
        assert!((x1 - 0.3).abs() < 1e-6);
        assert!((y1 - 0.4).abs() < 1e-6);
        assert!((x2 - 0.7).abs() < 1e-6);
        assert!((y2 - 0.6).abs() < 1e-6);
    }

    /// Test that confidence threshold filters detections correctly
    #[test]
    fn test_confidence_threshold_filtering() {
        // sigmoid(0.62) ≈ 0.65, sigmoid(0.85) ≈ 0.70, sigmoid(1.39) ≈ 0.80
        let boxes = vec![
            [0.1, 0.1, 0.1, 0.1],
            [0.2, 0.2, 0.1, 0.1],
            [0.3, 0.3, 0.1, 0.1],
        ];
        let class_logits = vec![(1, 0.62), (2, 0.85), (3, 1.39)];
        let (dets, logits) = model_output(boxes, class_logits, 91);

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(512, 512, 1.0, 0.0, 0.0),
        );

        assert_eq!(detections.len(), 2, "Should filter out confidence < 0.7");
        assert!((detections[0].confidence - 0.7).abs() < 0.02);
        assert!(detections[1].confidence > 0.75);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[0].label, "bicycle");
        assert_eq!(detections[1].class_id, 2);
        assert_eq!(detections[1].label, "car");
    }

    /// Test coordinate inverse transformation with known values
    #[test]
    fn test_coordinate_inverse_transformation() {
        // 800x600 source letterboxed into 512x512: scale 0.64, offset_y 64.
        // Normalized box (0.4, 0.4, 0.6, 0.6) -> (204.8, 204.8, 307.2, 307.2) in input
        // space -> (320, 220, 480, 380) in source space.
        let (dets, logits) = model_output(vec![[0.5, 0.5, 0.2, 0.2]], vec![(1, 5.0)], 91);

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(800, 600, 0.64, 0.0, 64.0),
        );

        assert_eq!(detections.len(), 1);
        let bbox = detections[0].bbox;
        assert!((bbox.x - 320.0).abs() < 0.1, "x incorrect: {}", bbox.x);
        assert!((bbox.y - 220.0).abs() < 0.1, "y incorrect: {}", bbox.y);
        assert!((bbox.x2() - 480.0).abs() < 0.1, "x2 incorrect: {}", bbox.x2());
        assert!((bbox.y2() - 380.0).abs() < 0.1, "y2 incorrect: {}", bbox.y2());
        assert!((bbox.width - 160.0).abs() < 0.1);
    }

    /// Test that coordinates are clamped to image bounds
    #[test]
    fn test_coordinates_clamped_to_image_bounds() {
        let boxes = vec![
            [0.05, 0.05, 0.2, 0.2],
            [0.95, 0.95, 0.2, 0.2],
            [0.5, 0.5, 0.2, 0.2],
        ];
        let class_logits = vec![(1, 5.0), (2, 5.0), (3, 5.0)];
        let (dets, logits) = model_output(boxes, class_logits, 91);

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(400, 400, 1.0, 50.0, 50.0),
        );

        assert_eq!(detections.len(), 3);
        assert_eq!(detections[0].bbox.x, 0.0, "Negative x should be clamped to 0");
        assert_eq!(detections[0].bbox.y, 0.0, "Negative y should be clamped to 0");
        assert!(
            (detections[1].bbox.x2() - 400.0).abs() < 1e-3,
            "x2 exceeding width should be clamped"
        );
        assert!(
            (detections[1].bbox.y2() - 400.0).abs() < 1e-3,
            "y2 exceeding height should be clamped"
        );
    }

    /// Boxes that fall entirely in the letterbox padding have no area
    #[test]
    fn test_boxes_in_padding_are_dropped() {
        // Source 512x256 sits at offset_y 128; this box covers rows 0..51 of the input.
        let (dets, logits) = model_output(vec![[0.5, 0.05, 0.2, 0.1]], vec![(1, 5.0)], 91);

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(512, 256, 1.0, 0.0, 128.0),
        );

        assert!(detections.is_empty());
    }

    #[test]
    fn test_zero_detections_when_all_below_threshold() {
        let boxes = vec![
            [0.1, 0.1, 0.1, 0.1],
            [0.2, 0.2, 0.1, 0.1],
            [0.3, 0.3, 0.1, 0.1],
        ];
        let class_logits = vec![(1, -2.0), (2, -1.0), (3, -0.1)];
        let (dets, logits) = model_output(boxes, class_logits, 91);

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(512, 512, 1.0, 0.0, 0.0),
        );

        assert!(detections.is_empty());
    }

    /// Test class ID extraction via argmax, skipping the background slot
    #[test]
    fn test_class_id_argmax() {
        let boxes = vec![
            [0.1, 0.1, 0.1, 0.1],
            [0.2, 0.2, 0.1, 0.1],
            [0.3, 0.3, 0.1, 0.1],
            [0.4, 0.4, 0.1, 0.1],
        ];
        let class_logits = vec![(1, 5.0), (44, 5.0), (90, 5.0), (2, 5.0)];
        let (dets, mut logits) = model_output(boxes, class_logits, 91);
        // A strong background logit must never win the argmax
        logits[[0, 0, 0]] = 20.0;

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(512, 512, 1.0, 0.0, 0.0),
        );

        let ids: Vec<u16> = detections.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 43, 89, 1]);
        assert_eq!(detections[1].label, "bottle");
        assert_eq!(detections[2].label, "toothbrush");
    }

    #[test]
    fn test_class_filter() {
        let boxes = vec![[0.2, 0.2, 0.1, 0.1], [0.5, 0.5, 0.1, 0.1]];
        let class_logits = vec![(1, 5.0), (3, 5.0)];
        let (dets, logits) = model_output(boxes, class_logits, 91);

        let post = PostProcessor::new(0.5, vec![2], 1000);
        let detections = parse(&post, &dets, &logits, &test_transform(512, 512, 1.0, 0.0, 0.0));

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "car");
    }

    /// The cap drops the least confident entries and keeps query order
    #[test]
    fn test_max_detections_cap() {
        let boxes = vec![
            [0.1, 0.1, 0.1, 0.1],
            [0.3, 0.3, 0.1, 0.1],
            [0.5, 0.5, 0.1, 0.1],
            [0.7, 0.7, 0.1, 0.1],
        ];
        let class_logits = vec![(1, 2.0), (2, 6.0), (3, 1.0), (4, 4.0)];
        let (dets, logits) = model_output(boxes, class_logits, 91);

        let post = PostProcessor::new(0.5, Vec::new(), 2);
        let detections = parse(&post, &dets, &logits, &test_transform(512, 512, 1.0, 0.0, 0.0));

        let ids: Vec<u16> = detections.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_empty_input() {
        let dets = Array::from_shape_vec(IxDyn(&[1, 0, 4]), vec![]).unwrap();
        let logits = Array::from_shape_vec(IxDyn(&[1, 0, 91]), vec![]).unwrap();

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(512, 512, 1.0, 0.0, 0.0),
        );

        assert!(detections.is_empty());
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let dets = Array::from_shape_vec(IxDyn(&[1, 2, 4]), vec![0.0; 8]).unwrap();
        let logits = Array::from_shape_vec(IxDyn(&[1, 3, 91]), vec![0.0; 273]).unwrap();

        let err = test_postprocessor()
            .parse_detections(
                &dets.view(),
                &logits.view(),
                &test_transform(512, 512, 1.0, 0.0, 0.0),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    /// Test realistic RF-DETR scenario with mixed confidences
    #[test]
    fn test_realistic_rfdetr_output() {
        let num_queries = 300;
        let num_classes = 91;

        let mut dets_data = vec![0.0f32; num_queries * 4];
        dets_data[0..4].copy_from_slice(&[0.2, 0.3, 0.2, 0.4]);
        dets_data[4..8].copy_from_slice(&[0.5, 0.5, 0.3, 0.3]);
        dets_data[8..12].copy_from_slice(&[0.8, 0.8, 0.3, 0.3]);
        let dets = Array::from_shape_vec(IxDyn(&[1, num_queries, 4]), dets_data).unwrap();

        let mut logits_data = vec![-10.0f32; num_queries * num_classes];
        logits_data[1] = 5.0; // person
        logits_data[num_classes + 18] = 3.5; // dog
        logits_data[2 * num_classes + 3] = 2.5; // car
        let logits =
            Array::from_shape_vec(IxDyn(&[1, num_queries, num_classes]), logits_data).unwrap();

        let detections = parse(
            &test_postprocessor(),
            &dets,
            &logits,
            &test_transform(512, 512, 1.0, 0.0, 0.0),
        );

        assert_eq!(detections.len(), 3, "Should filter 300 queries to 3 detections");
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["person", "dog", "car"]);
        assert!(detections[0].confidence > 0.99);
        assert!(detections[1].confidence > 0.95);
        assert!(detections[2].confidence > 0.90);
    }
}
