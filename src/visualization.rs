use crate::detection::Detection;
use crate::tracker::STrack;
use crate::utils;
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

const COLORS: &[Scalar] = &[
    Scalar::new(56.0, 56.0, 255.0, 0.0),
    Scalar::new(151.0, 157.0, 255.0, 0.0),
    Scalar::new(31.0, 112.0, 255.0, 0.0),
    Scalar::new(29.0, 178.0, 255.0, 0.0),
    Scalar::new(49.0, 210.0, 207.0, 0.0),
    Scalar::new(10.0, 249.0, 72.0, 0.0),
    Scalar::new(23.0, 204.0, 146.0, 0.0),
    Scalar::new(134.0, 219.0, 61.0, 0.0),
    Scalar::new(52.0, 147.0, 26.0, 0.0),
    Scalar::new(187.0, 212.0, 0.0, 0.0),
];

fn color_for(key: usize) -> Scalar {
    COLORS[key % COLORS.len()]
}

/// Filled label box above `anchor` with the text on top.
fn draw_label(frame: &mut Mat, text: &str, anchor: Point, color: Scalar) -> opencv::Result<()> {
    let mut baseline = 0;
    let size = imgproc::get_text_size(text, imgproc::FONT_HERSHEY_SIMPLEX, 0.5, 1, &mut baseline)?;
    let top = (anchor.y - size.height - 6).max(0);
    let bg = Rect::new(anchor.x, top, size.width + 4, size.height + 6);
    imgproc::rectangle(frame, bg, color, -1, imgproc::LINE_8, 0)?;
    imgproc::put_text(
        frame,
        text,
        Point::new(anchor.x + 2, top + size.height + 2),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_AA,
        false,
    )
}

pub fn draw_detection(frame: &mut Mat, det: &Detection, names: &[String]) -> opencv::Result<()> {
    let rect = utils::clip_rect(&det.tlwh_array(), frame.cols(), frame.rows());
    let color = color_for(det.class_id.max(0) as usize);
    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;

    let text = format!("{} {:.2}", utils::class_name(names, det.class_id), det.confidence());
    draw_label(frame, &text, Point::new(rect.x, rect.y), color)
}

pub fn draw_track(frame: &mut Mat, track: &STrack, names: &[String]) -> opencv::Result<()> {
    if !track.is_activated() {
        return Ok(());
    }
    let rect = utils::clip_rect(&track.tlwh_array(), frame.cols(), frame.rows());
    let color = color_for(track.track_id() as usize);
    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;

    let text = format!(
        "id:{} {} {:.2}",
        track.track_id(),
        utils::class_name(names, track.class_id),
        track.score
    );
    draw_label(frame, &text, Point::new(rect.x, rect.y), color)
}

pub fn draw_detections(frame: &mut Mat, detections: &[Detection], names: &[String]) -> opencv::Result<()> {
    for det in detections {
        draw_detection(frame, det, names)?;
    }
    Ok(())
}

pub fn draw_tracks(frame: &mut Mat, tracks: &[STrack], names: &[String]) -> opencv::Result<()> {
    for track in tracks {
        draw_track(frame, track, names)?;
    }
    Ok(())
}
