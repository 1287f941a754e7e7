//! Box helpers shared by the detector and the tracker.
use opencv::core::Rect;

/// Perform class-aware non-max suppression, return indices to keep sorted by
/// descending score.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], classes: &[i32], iou_thresh: f32) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_unstable_by(|&i, &j| scores[j].total_cmp(&scores[i]));
    let mut keep = Vec::new();
    while let Some(&i) = idxs.first() {
        keep.push(i);
        idxs = idxs
            .into_iter()
            .skip(1)
            .filter(|&j| classes[i] != classes[j] || iou_tlwh(&boxes[i], &boxes[j]) < iou_thresh)
            .collect();
    }
    keep
}

/// IoU between two boxes given as [x, y, w, h].
pub fn iou_tlwh(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    iou_tlbr(
        &[a[0], a[1], a[0] + a[2], a[1] + a[3]],
        &[b[0], b[1], b[0] + b[2], b[1] + b[3]],
    )
}

/// IoU between two boxes given as [x1, y1, x2, y2].
pub fn iou_tlbr(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let a_area = (a[2] - a[0]) * (a[3] - a[1]);
    let b_area = (b[2] - b[0]) * (b[3] - b[1]);
    let union = a_area + b_area - inter_area;

    if union <= 0.0 {
        return 0.0;
    }
    inter_area / union
}

/// Clip a [x, y, w, h] box to the frame and convert to an integer rect.
pub fn clip_rect(tlwh: &[f32; 4], width: i32, height: i32) -> Rect {
    let x1 = (tlwh[0].round() as i32).clamp(0, width.max(1) - 1);
    let y1 = (tlwh[1].round() as i32).clamp(0, height.max(1) - 1);
    let x2 = ((tlwh[0] + tlwh[2]).round() as i32).clamp(x1, width);
    let y2 = ((tlwh[1] + tlwh[3]).round() as i32).clamp(y1, height);
    Rect::new(x1, y1, x2 - x1, y2 - y1)
}

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Resolve a display name, preferring the configured list.
pub fn class_name(names: &[String], class_id: i32) -> String {
    let idx = class_id as usize;
    if class_id >= 0 {
        if let Some(name) = names.get(idx) {
            return name.clone();
        }
        if names.is_empty() {
            if let Some(name) = COCO_CLASSES.get(idx) {
                return (*name).to_string();
            }
        }
    }
    format!("class_{}", class_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [10.0, 10.0, 20.0, 20.0];
        assert_relative_eq!(iou_tlwh(&b, &b), 1.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [5.0, 0.0, 10.0, 10.0];
        assert_relative_eq!(iou_tlwh(&a, &b), 50.0 / 150.0, epsilon = 1e-6);
        assert_relative_eq!(iou_tlwh(&a, &[20.0, 20.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn nms_suppresses_same_class_only() {
        let boxes = [
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 10.0, 10.0],
            [1.0, 1.0, 10.0, 10.0],
            [50.0, 50.0, 10.0, 10.0],
        ];
        let scores = [0.6, 0.9, 0.8, 0.7];
        let classes = [0, 0, 2, 0];
        let keep = nms(&boxes, &scores, &classes, 0.45);
        assert_eq!(keep, vec![1, 2, 3]);
    }

    #[test]
    fn class_names_fall_back_to_coco() {
        assert_eq!(class_name(&[], 15), "cat");
        assert_eq!(class_name(&["smoke".to_string()], 0), "smoke");
        assert_eq!(class_name(&["smoke".to_string()], 3), "class_3");
        assert_eq!(class_name(&[], 99), "class_99");
    }

    #[test]
    fn clip_rect_stays_inside_frame() {
        let r = clip_rect(&[-5.0, -5.0, 30.0, 30.0], 20, 10);
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 20, 10));
    }
}
