use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::kalman_filter::{KalmanFilter, StateCov, StateMean};
use crate::utils;
use nalgebra::SVector;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    New,
    Tracked,
    Lost,
    Removed,
}

/// Single object track.
#[derive(Debug, Clone)]
pub struct STrack {
    mean: StateMean,
    covariance: StateCov,
    /// Bounding box in (tlwh) format
    pub tlwh: SVector<f32, 4>,
    pub score: f32,
    pub track_id: u32,
    pub state: TrackState,
    is_activated: bool,
    /// Frame of the last matched detection
    frame_id: u64,
    start_frame: u64,
    tracklet_len: u32,
    pub class_id: i32,
}

impl STrack {
    pub fn new(kalman: &KalmanFilter, det: &Detection) -> Self {
        let (mean, covariance) = kalman.initiate(&det.tlwh);
        STrack {
            mean,
            covariance,
            tlwh: det.tlwh,
            score: det.confidence,
            track_id: 0,
            state: TrackState::New,
            is_activated: false,
            frame_id: 0,
            start_frame: 0,
            tracklet_len: 0,
            class_id: det.class_id,
        }
    }

    fn state_to_tlwh(&self) -> SVector<f32, 4> {
        self.mean.fixed_rows::<4>(0).into()
    }

    pub fn tlwh_array(&self) -> [f32; 4] {
        [self.tlwh[0], self.tlwh[1], self.tlwh[2], self.tlwh[3]]
    }

    pub fn predict(&mut self, kalman: &KalmanFilter) {
        let mut mean = self.mean;
        if self.state != TrackState::Tracked {
            // Size velocities are frozen for tracks that missed a frame.
            mean[6] = 0.0;
            mean[7] = 0.0;
        }
        let (mean, covariance) = kalman.predict(&mean, &self.covariance);
        self.mean = mean;
        self.covariance = covariance;
        self.tlwh = self.state_to_tlwh();
    }

    pub fn activate(&mut self, frame_id: u64, track_id: u32) {
        self.track_id = track_id;
        self.state = TrackState::Tracked;
        self.tracklet_len = 0;
        // Only tracks born on the first frame are trusted immediately.
        self.is_activated = frame_id == 1;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    pub fn update(&mut self, kalman: &KalmanFilter, det: &Detection, frame_id: u64) {
        let (mean, covariance) = kalman.update(&self.mean, &self.covariance, &det.tlwh);
        self.mean = mean;
        self.covariance = covariance;
        self.tlwh = self.state_to_tlwh();
        self.frame_id = frame_id;
        self.tracklet_len += 1;
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.score = det.confidence;
        self.class_id = det.class_id;
    }

    pub fn re_activate(&mut self, kalman: &KalmanFilter, det: &Detection, frame_id: u64) {
        self.update(kalman, det, frame_id);
        self.tracklet_len = 0;
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    pub fn is_activated(&self) -> bool {
        self.is_activated
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn end_frame(&self) -> u64 {
        self.frame_id
    }
}

/// Greedy IoU assignment. Pairs are taken in ascending cost order while the
/// cost stays at or below `max_cost`.
fn associate(
    tracks: &[[f32; 4]],
    dets: &[[f32; 4]],
    max_cost: f32,
) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
    let mut pairs = Vec::new();
    for (i, t) in tracks.iter().enumerate() {
        for (j, d) in dets.iter().enumerate() {
            let cost = 1.0 - utils::iou_tlwh(t, d);
            if cost <= max_cost {
                pairs.push((cost, i, j));
            }
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut track_used = vec![false; tracks.len()];
    let mut det_used = vec![false; dets.len()];
    let mut matches = Vec::new();
    for (_, i, j) in pairs {
        if !track_used[i] && !det_used[j] {
            track_used[i] = true;
            det_used[j] = true;
            matches.push((i, j));
        }
    }

    let unmatched_tracks = (0..tracks.len()).filter(|&i| !track_used[i]).collect();
    let unmatched_dets = (0..dets.len()).filter(|&j| !det_used[j]).collect();
    (matches, unmatched_tracks, unmatched_dets)
}

/// Multi-object tracker: Kalman motion model plus two-stage IoU association
/// (confident detections first, then low-score ones for tracks left over).
pub struct Tracker {
    kalman: KalmanFilter,
    tracked: Vec<STrack>,
    lost: Vec<STrack>,
    frame_id: u64,
    track_id_count: u32,
    cfg: TrackerConfig,
}

impl Tracker {
    pub fn new(cfg: &TrackerConfig) -> Self {
        Tracker {
            kalman: KalmanFilter::new(),
            tracked: Vec::new(),
            lost: Vec::new(),
            frame_id: 0,
            track_id_count: 0,
            cfg: cfg.clone(),
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn lost_tracks(&self) -> &[STrack] {
        &self.lost
    }

    fn next_id(&mut self) -> u32 {
        self.track_id_count += 1;
        self.track_id_count
    }

    /// Feed one frame of detections, return the confirmed tracks for it.
    pub fn update(&mut self, dets: &[Detection]) -> Vec<STrack> {
        self.frame_id += 1;
        let frame_id = self.frame_id;
        let kalman = self.kalman.clone();

        let (high, low): (Vec<&Detection>, Vec<&Detection>) = dets
            .iter()
            .filter(|d| d.confidence >= self.cfg.track_low_thresh)
            .partition(|d| d.confidence >= self.cfg.track_high_thresh);

        let (confirmed, mut unconfirmed): (Vec<STrack>, Vec<STrack>) =
            std::mem::take(&mut self.tracked)
                .into_iter()
                .partition(|t| t.is_activated());

        // Stage 1: confirmed + lost tracks against confident detections.
        let mut pool: Vec<STrack> = confirmed;
        pool.append(&mut self.lost);
        for t in pool.iter_mut() {
            t.predict(&kalman);
        }
        let pool_boxes: Vec<[f32; 4]> = pool.iter().map(|t| t.tlwh_array()).collect();
        let high_boxes: Vec<[f32; 4]> = high.iter().map(|d| d.tlwh_array()).collect();
        let (matches, unmatched_pool, unmatched_high) =
            associate(&pool_boxes, &high_boxes, self.cfg.match_thresh);

        let mut next_tracked = Vec::new();
        let mut next_lost = Vec::new();
        for (ti, di) in matches {
            let mut track = pool[ti].clone();
            if track.state == TrackState::Tracked {
                track.update(&kalman, high[di], frame_id);
            } else {
                track.re_activate(&kalman, high[di], frame_id);
            }
            next_tracked.push(track);
        }

        // Stage 2: still-tracked leftovers against low-score detections.
        let (leftover_tracked, leftover_lost): (Vec<usize>, Vec<usize>) = unmatched_pool
            .into_iter()
            .partition(|&i| pool[i].state == TrackState::Tracked);
        let leftover_boxes: Vec<[f32; 4]> =
            leftover_tracked.iter().map(|&i| pool[i].tlwh_array()).collect();
        let low_boxes: Vec<[f32; 4]> = low.iter().map(|d| d.tlwh_array()).collect();
        let (matches, unmatched_leftover, _) = associate(&leftover_boxes, &low_boxes, 0.5);
        for (li, di) in matches {
            let mut track = pool[leftover_tracked[li]].clone();
            track.update(&kalman, low[di], frame_id);
            next_tracked.push(track);
        }
        for li in unmatched_leftover {
            let mut track = pool[leftover_tracked[li]].clone();
            track.mark_lost();
            next_lost.push(track);
        }
        for i in leftover_lost {
            next_lost.push(pool[i].clone());
        }

        // Stage 3: tracks seen once, confirmed by a second sighting or dropped.
        let remaining_high: Vec<&Detection> = unmatched_high.iter().map(|&j| high[j]).collect();
        let unconfirmed_boxes: Vec<[f32; 4]> =
            unconfirmed.iter().map(|t| t.tlwh_array()).collect();
        let rem_boxes: Vec<[f32; 4]> = remaining_high.iter().map(|d| d.tlwh_array()).collect();
        let (matches, _, unmatched_new) = associate(&unconfirmed_boxes, &rem_boxes, 0.7);
        for (ui, di) in matches {
            unconfirmed[ui].update(&kalman, remaining_high[di], frame_id);
            next_tracked.push(unconfirmed[ui].clone());
        }

        // New identities for confident detections nobody claimed.
        for j in unmatched_new {
            let det = remaining_high[j];
            if det.confidence < self.cfg.new_track_thresh {
                continue;
            }
            let mut track = STrack::new(&kalman, det);
            let id = self.next_id();
            track.activate(frame_id, id);
            next_tracked.push(track);
        }

        let max_lost = self.cfg.track_buffer as u64;
        next_lost.retain_mut(|t| {
            if frame_id - t.end_frame() > max_lost {
                t.mark_removed();
                trace!(track_id = t.track_id, "track removed");
                false
            } else {
                true
            }
        });

        self.tracked = next_tracked;
        self.lost = next_lost;

        self.tracked
            .iter()
            .filter(|t| t.is_activated())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, score: f32) -> Detection {
        Detection::new(SVector::<f32, 4>::new(x, y, 50.0, 50.0), score, 0)
    }

    #[test]
    fn strack_lifecycle() {
        let kf = KalmanFilter::new();
        let mut track = STrack::new(&kf, &det(100.0, 100.0, 0.9));
        assert_eq!(track.state, TrackState::New);

        track.activate(1, 7);
        assert_eq!(track.state, TrackState::Tracked);
        assert!(track.is_activated());

        track.mark_lost();
        assert_eq!(track.state, TrackState::Lost);

        track.re_activate(&kf, &det(110.0, 105.0, 0.95), 2);
        assert_eq!(track.state, TrackState::Tracked);
        assert_eq!(track.track_id(), 7);
    }

    #[test]
    fn identities_persist_across_frames() {
        let mut tracker = Tracker::new(&TrackerConfig::default());

        let first = tracker.update(&[det(100.0, 100.0, 0.9), det(300.0, 300.0, 0.8)]);
        assert_eq!(first.len(), 2);
        let mut ids: Vec<u32> = first.iter().map(|t| t.track_id()).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);

        let second = tracker.update(&[det(305.0, 298.0, 0.85), det(104.0, 102.0, 0.88)]);
        assert_eq!(second.len(), 2);
        for t in &second {
            if t.tlwh[0] < 200.0 {
                assert_eq!(t.track_id(), 1);
            } else {
                assert_eq!(t.track_id(), 2);
            }
        }
    }

    #[test]
    fn low_score_detection_keeps_track_alive() {
        let mut tracker = Tracker::new(&TrackerConfig::default());
        tracker.update(&[det(100.0, 100.0, 0.9)]);
        let tracks = tracker.update(&[det(102.0, 101.0, 0.3)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id(), 1);
        assert!(tracker.lost_tracks().is_empty());
    }

    #[test]
    fn missing_track_is_lost_then_recovered_with_same_id() {
        let mut tracker = Tracker::new(&TrackerConfig::default());
        tracker.update(&[det(100.0, 100.0, 0.9)]);
        assert!(tracker.update(&[]).is_empty());
        assert_eq!(tracker.lost_tracks().len(), 1);

        let tracks = tracker.update(&[det(100.0, 100.0, 0.9)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id(), 1);
    }

    #[test]
    fn lost_tracks_expire_after_buffer() {
        let cfg = TrackerConfig {
            track_buffer: 2,
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::new(&cfg);
        tracker.update(&[det(100.0, 100.0, 0.9)]);
        for _ in 0..3 {
            tracker.update(&[]);
        }
        assert!(tracker.lost_tracks().is_empty());
    }

    #[test]
    fn later_tracks_need_a_second_sighting() {
        let mut tracker = Tracker::new(&TrackerConfig::default());
        tracker.update(&[]);
        assert!(tracker.update(&[det(50.0, 50.0, 0.9)]).is_empty());
        let tracks = tracker.update(&[det(51.0, 50.0, 0.9)]);
        assert_eq!(tracks.len(), 1);
    }
}
