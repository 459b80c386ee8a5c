//! Post-hoc repair of a finished track store
//!
//! Three passes run in order: noise rejection, fragment merging, swap repair.
//! Candidate evaluation is parallel; every change to the store is applied
//! sequentially afterwards. Rounds repeat until nothing changes, so running
//! the engine on its own output is a no-op.

use crate::config::CleanupConfig;
use crate::detection::{mean_signature, signature_distance, Detection};
use crate::error::Result;
use crate::hungarian::HungarianSolver;
use crate::store::{TrackStore, TrackWarning};
use crate::track::{linear_slope, Track, TrackId};
use ndarray::prelude::*;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on full noise/merge/swap rounds
const MAX_ROUNDS: usize = 16;

/// Upper bound on merge or swap iterations inside one pass
const MAX_PASS_ITERATIONS: usize = 64;

/// Share of a density window's frames a lone fish must be detected in for
/// its band to count as populated, when no explicit threshold is set
const KDE_DETECTION_FRACTION: f64 = 0.05;

/// Kernel support in standard deviations
const KDE_CUTOFF_SIGMAS: f64 = 4.0;

/// An accepted exchange of track tails at a crossing
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRepair {
    pub identities: (TrackId, TrackId),
    /// First frame of the exchanged tails
    pub cut_frame: u64,
    /// Signature cost removed by the exchange
    pub gain: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub rejected: Vec<TrackId>,
    /// (surviving id, absorbed id)
    pub merged: Vec<(TrackId, TrackId)>,
    pub dropped_duplicates: usize,
    pub swaps: Vec<SwapRepair>,
    pub unresolved_swaps: usize,
    pub rounds: usize,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        self.rejected.is_empty() && self.merged.is_empty() && self.swaps.is_empty()
    }
}

/// Proposed link from the end of one fragment to the start of another
#[derive(Debug, Clone, PartialEq)]
struct MergeCandidate {
    from: TrackId,
    to: TrackId,
    cost: f64,
}

/// Outcome of inspecting one crossing episode
#[derive(Debug, Clone, PartialEq)]
enum SwapVerdict {
    Swap(SwapRepair),
    Unresolved {
        identities: (TrackId, TrackId),
        frame_index: u64,
        reason: String,
    },
}

pub struct CleanupEngine {
    config: CleanupConfig,
}

impl CleanupEngine {
    pub fn new(config: CleanupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Run all passes until the store is stable and mark survivors final
    pub fn run(&self, mut store: TrackStore) -> (TrackStore, CleanupReport) {
        let mut report = CleanupReport::default();
        let initial = store.len();

        for round in 0..MAX_ROUNDS {
            let rejected = self.reject_noise(&mut store);
            let (merged, dropped) = self.merge_fragments(&mut store);
            let (swaps, unresolved) = self.repair_swaps(&mut store);

            let changed = !(rejected.is_empty() && merged.is_empty() && swaps.is_empty());
            report.rejected.extend(rejected);
            report.merged.extend(merged);
            report.dropped_duplicates += dropped;
            report.swaps.extend(swaps);
            report.unresolved_swaps += unresolved;
            report.rounds = round + 1;

            if !changed {
                break;
            }
            if round + 1 == MAX_ROUNDS {
                log::warn!("Cleanup did not settle after {} rounds", MAX_ROUNDS);
            }
        }

        store.finalize();
        log::info!(
            "Cleanup: {} -> {} identities ({} rejected, {} merged, {} swaps, {} unresolved) in {} rounds",
            initial,
            store.len(),
            report.rejected.len(),
            report.merged.len(),
            report.swaps.len(),
            report.unresolved_swaps,
            report.rounds
        );
        (store, report)
    }

    fn is_noise(&self, track: &Track) -> bool {
        let c = &self.config;
        track.len() < c.min_track_len
            || track.span() < c.min_track_span
            || track.density() < c.min_density
            || c
                .min_peak_power
                .is_some_and(|floor| track.mean_peak_power() < floor)
    }

    /// Pass 1: drop implausibly short, sparse or weak identities, and those
    /// outside every well-populated frequency band
    pub fn reject_noise(&self, store: &mut TrackStore) -> Vec<TrackId> {
        let populated = self.populated_band_tracks(store);
        let rejected: Vec<TrackId> = store
            .tracks()
            .filter(|t| {
                self.is_noise(t) || populated.as_ref().is_some_and(|ids| !ids.contains(&t.id))
            })
            .map(|t| t.id)
            .collect();
        for id in &rejected {
            store.remove(*id);
        }
        if !rejected.is_empty() {
            log::debug!("Noise rejection removed {} identities", rejected.len());
        }
        rejected
    }

    /// Identities lying in a populated frequency band in at least one window
    ///
    /// The recording is cut into overlapping windows. In each window a
    /// Gaussian kernel density is estimated over the frequencies of all
    /// detections, and an identity with two or more detections there is kept
    /// if one of them sits where the density exceeds the threshold. `None`
    /// when the filter is disabled.
    fn populated_band_tracks(&self, store: &TrackStore) -> Option<BTreeSet<TrackId>> {
        let c = &self.config;
        let sigma = c.kde_sigma_hz?;
        let tracks: Vec<&Track> = store.tracks().filter(|t| !t.is_empty()).collect();
        let first = tracks.iter().map(|t| t.first_frame()).min()?;
        let last = tracks.iter().map(|t| t.last_frame()).max()?;

        let window = c.kde_window_frames;
        let step = ((window as f64 * (1.0 - c.kde_window_overlap)) as u64).max(1);
        let starts: Vec<u64> = (first..=last).step_by(step as usize).collect();

        let populated: BTreeSet<TrackId> = starts
            .par_iter()
            .flat_map_iter(|&start| {
                let end = (start + window - 1).min(last);
                self.dense_in_window(&tracks, start, end, sigma)
            })
            .collect();
        Some(populated)
    }

    /// Identities with a detection in a populated band within frames `start..=end`
    fn dense_in_window(&self, tracks: &[&Track], start: u64, end: u64, sigma: f64) -> Vec<TrackId> {
        let windows: Vec<&[Detection]> = tracks.iter().map(|t| t.window(start, end)).collect();
        let mut frequencies: Vec<f64> = windows
            .iter()
            .flat_map(|w| w.iter().map(|d| d.frequency))
            .collect();
        frequencies.sort_by(f64::total_cmp);

        let peak = 1.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
        let frames = (end - start + 1) as f64;
        let threshold = self
            .config
            .kde_threshold
            .unwrap_or(KDE_DETECTION_FRACTION * frames * peak);

        tracks
            .iter()
            .zip(&windows)
            .filter(|(_, w)| w.len() > 1)
            .filter(|(_, w)| {
                w.iter()
                    .any(|d| frequency_density(&frequencies, d.frequency, sigma) > threshold)
            })
            .map(|(t, _)| t.id)
            .collect()
    }

    /// Pass 2: join fragments separated by a short gap
    ///
    /// Returns the applied (survivor, absorbed) pairs and the number of
    /// duplicate detections dropped from overlapping fragments.
    pub fn merge_fragments(&self, store: &mut TrackStore) -> (Vec<(TrackId, TrackId)>, usize) {
        let mut merged = Vec::new();
        let mut dropped = 0;

        for _ in 0..MAX_PASS_ITERATIONS {
            let links = self.link_fragments(store);
            if links.is_empty() {
                break;
            }
            for chain in chains(&links) {
                let head = chain[0];
                if !store.contains(head) {
                    continue;
                }
                for &next in &chain[1..] {
                    let Some(fragment) = store.remove(next) else {
                        continue;
                    };
                    if let Some(track) = store.get_mut(head) {
                        dropped += track.append_after(fragment.detections().to_vec());
                        merged.push((head, next));
                    }
                }
            }
        }

        if !merged.is_empty() {
            log::debug!(
                "Fragment merging joined {} fragments ({} duplicate detections dropped)",
                merged.len(),
                dropped
            );
        }
        (merged, dropped)
    }

    /// Globally consistent end-to-start links between fragments
    fn link_fragments(&self, store: &TrackStore) -> Vec<(TrackId, TrackId)> {
        let tracks: Vec<&Track> = store.tracks().collect();
        let all: &[&Track] = &tracks;

        let candidates: Vec<MergeCandidate> = all
            .par_iter()
            .flat_map_iter(|a| {
                all.iter().filter_map(move |b| {
                    self.merge_cost(a, b, all).map(|cost| MergeCandidate {
                        from: a.id,
                        to: b.id,
                        cost,
                    })
                })
            })
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let ends: Vec<TrackId> = candidates
            .iter()
            .map(|c| c.from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let starts: Vec<TrackId> = candidates
            .iter()
            .map(|c| c.to)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let row_of: BTreeMap<TrackId, usize> = ends.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let col_of: BTreeMap<TrackId, usize> = starts.iter().enumerate().map(|(j, id)| (*id, j)).collect();

        let mut costs = Array2::from_elem((ends.len(), starts.len()), f64::INFINITY);
        for candidate in &candidates {
            costs[[row_of[&candidate.from], col_of[&candidate.to]]] = candidate.cost;
        }

        let threshold = 1.0 + self.config.signature_weight;
        HungarianSolver::solve(costs.view(), threshold)
            .assignments
            .into_iter()
            .map(|(row, col)| (ends[row], starts[col]))
            .collect()
    }

    /// Cost of continuing `a` with `b`, if the two are compatible
    fn merge_cost(&self, a: &Track, b: &Track, all: &[&Track]) -> Option<f64> {
        let c = &self.config;
        if a.id == b.id || a.is_empty() || b.is_empty() {
            return None;
        }
        if b.first_frame() <= a.first_frame() || b.last_frame() <= a.last_frame() {
            return None;
        }

        let a_last = a.last()?;
        let overlap = (a_last.frame_index + 1).saturating_sub(b.first_frame());
        if overlap > c.max_overlap_frames as u64 {
            return None;
        }

        // Part of b that would extend a
        let rest = b.window(a_last.frame_index + 1, b.last_frame());
        let b_next = rest.first()?;
        let missed = b_next.frame_index - a_last.frame_index - 1;
        if missed > c.gap_tolerance as u64 {
            return None;
        }

        let elapsed = (missed + 1) as f64;
        let allowed_jump = c.max_freq_jump_hz * elapsed;
        let window = c.endpoint_window;

        let forward = a_last.frequency + a.frequency_slope(window) * elapsed;
        let lead = &rest[..window.min(rest.len())];
        let backward = b_next.frequency - linear_slope(lead) * elapsed;
        let freq_cost = ((b_next.frequency - forward).abs() / allowed_jump)
            .max((backward - a_last.frequency).abs() / allowed_jump);
        if freq_cost > 1.0 {
            return None;
        }

        let tail = a.tail_signature(window)?;
        let head = mean_signature(lead.iter().map(|d| d.signature_view()))?;
        let sig_cost = signature_distance(tail.view(), head.view());
        if sig_cost > c.max_merge_signature_distance {
            return None;
        }

        let merged_len = a.len() + rest.len();
        let merged_density = merged_len as f64 / (b.last_frame() - a.first_frame() + 1) as f64;
        if merged_density < c.min_density {
            return None;
        }

        if missed > 0
            && self.gap_is_occupied(a_last, b_next, allowed_jump, tail.view(), (a.id, b.id), all)
        {
            return None;
        }

        Some(freq_cost + c.signature_weight * sig_cost)
    }

    /// True if a third identity that could be the same fish has detections inside the gap
    ///
    /// Only detections near the interpolated frequency count, and only when
    /// their mean signature is as close to the tail of the earlier fragment
    /// as a merge would require.
    fn gap_is_occupied(
        &self,
        last: &Detection,
        next: &Detection,
        tolerance: f64,
        tail: ArrayView1<f32>,
        (a, b): (TrackId, TrackId),
        all: &[&Track],
    ) -> bool {
        let span = (next.frame_index - last.frame_index) as f64;
        all.iter()
            .filter(|t| t.id != a && t.id != b)
            .any(|t| {
                let inside: Vec<&Detection> = t
                    .window(last.frame_index + 1, next.frame_index - 1)
                    .iter()
                    .filter(|d| {
                        let w = (d.frame_index - last.frame_index) as f64 / span;
                        let expected = last.frequency + w * (next.frequency - last.frequency);
                        (d.frequency - expected).abs() <= tolerance
                    })
                    .collect();
                mean_signature(inside.iter().map(|d| d.signature_view())).is_some_and(|sig| {
                    signature_distance(sig.view(), tail) <= self.config.max_merge_signature_distance
                })
            })
    }

    /// Pass 3: exchange tails of identities swapped at a crossing
    ///
    /// Returns the applied repairs and the number of unresolved warnings raised.
    pub fn repair_swaps(&self, store: &mut TrackStore) -> (Vec<SwapRepair>, usize) {
        let mut repairs = Vec::new();
        let mut unresolved = 0;

        for _ in 0..MAX_PASS_ITERATIONS {
            let verdicts = self.inspect_crossings(store);

            let mut swaps: Vec<SwapRepair> = Vec::new();
            for verdict in verdicts {
                match verdict {
                    SwapVerdict::Swap(repair) => swaps.push(repair),
                    SwapVerdict::Unresolved {
                        identities,
                        frame_index,
                        reason,
                    } => {
                        let warning = TrackWarning::UnresolvedSwap {
                            frame_index,
                            identities: vec![identities.0, identities.1],
                            reason,
                        };
                        if store.warn_once(warning) {
                            unresolved += 1;
                        }
                    }
                }
            }
            if swaps.is_empty() {
                break;
            }

            // Largest gains first; an identity takes part in one swap per iteration
            swaps.sort_by(|x, y| {
                y.gain
                    .total_cmp(&x.gain)
                    .then(x.identities.cmp(&y.identities))
                    .then(x.cut_frame.cmp(&y.cut_frame))
            });
            let mut used = BTreeSet::new();
            for repair in swaps {
                let (a, b) = repair.identities;
                if used.contains(&a) || used.contains(&b) {
                    continue;
                }
                if exchange_tails(store, a, b, repair.cut_frame) {
                    log::debug!(
                        "Swap repair: exchanged tails of {} and {} from frame {}",
                        a,
                        b,
                        repair.cut_frame
                    );
                    used.insert(a);
                    used.insert(b);
                    repairs.push(repair);
                }
            }
        }
        (repairs, unresolved)
    }

    fn inspect_crossings(&self, store: &TrackStore) -> Vec<SwapVerdict> {
        let tracks: Vec<&Track> = store.tracks().collect();
        let pairs: Vec<(usize, usize)> = (0..tracks.len())
            .flat_map(|i| (i + 1..tracks.len()).map(move |j| (i, j)))
            .filter(|&(i, j)| {
                let (a, b) = (tracks[i], tracks[j]);
                a.first_frame() <= b.last_frame() && b.first_frame() <= a.last_frame()
            })
            .collect();

        pairs
            .par_iter()
            .flat_map_iter(|&(i, j)| self.inspect_pair(tracks[i], tracks[j], &tracks))
            .collect()
    }

    fn inspect_pair(&self, a: &Track, b: &Track, all: &[&Track]) -> Vec<SwapVerdict> {
        let band = self.config.crossing_band_hz;
        let window = self.config.swap_window;

        crossing_episodes(a, b, band)
            .into_iter()
            .filter_map(|episode| {
                let (start, end, closest) = episode;

                let a_before = before(a, start, window);
                let b_before = before(b, start, window);
                let a_after = after(a, end, window);
                let b_after = after(b, end, window);
                if [a_before, b_before, a_after, b_after]
                    .iter()
                    .any(|w| w.len() < window)
                {
                    return None;
                }

                let sig = |x: &[Detection], y: &[Detection]| -> Option<f64> {
                    let mx = mean_signature(x.iter().map(|d| d.signature_view()))?;
                    let my = mean_signature(y.iter().map(|d| d.signature_view()))?;
                    Some(signature_distance(mx.view(), my.view()))
                };
                let keep = sig(a_before, a_after)? + sig(b_before, b_after)?;
                if keep <= self.config.swap_signature_threshold {
                    return None;
                }
                let swap = sig(a_before, b_after)? + sig(b_before, a_after)?;

                let identities = (a.id, b.id);
                if third_track_in_crossing(a, b, start, end, band, all) {
                    return Some(SwapVerdict::Unresolved {
                        identities,
                        frame_index: closest,
                        reason: "three or more identities cross together".to_string(),
                    });
                }
                if swap + self.config.swap_margin > keep {
                    return Some(SwapVerdict::Unresolved {
                        identities,
                        frame_index: closest,
                        reason: format!(
                            "signature discontinuity not explained by a swap (keep {keep:.3}, swap {swap:.3})"
                        ),
                    });
                }

                // Frequency trends must not contradict the signature evidence
                let slope_keep = (linear_slope(a_before) - linear_slope(a_after)).abs()
                    + (linear_slope(b_before) - linear_slope(b_after)).abs();
                let slope_swap = (linear_slope(a_before) - linear_slope(b_after)).abs()
                    + (linear_slope(b_before) - linear_slope(a_after)).abs();
                if slope_swap > slope_keep + self.config.swap_slope_margin_hz {
                    return Some(SwapVerdict::Unresolved {
                        identities,
                        frame_index: closest,
                        reason: "signatures suggest a swap but frequency trends do not".to_string(),
                    });
                }

                Some(SwapVerdict::Swap(SwapRepair {
                    identities,
                    cut_frame: closest + 1,
                    gain: keep - swap,
                }))
            })
            .collect()
    }
}

/// Split accepted links into chains, each starting at a fragment nobody links to
fn chains(links: &[(TrackId, TrackId)]) -> Vec<Vec<TrackId>> {
    let successor: BTreeMap<TrackId, TrackId> = links.iter().copied().collect();
    let targets: BTreeSet<TrackId> = links.iter().map(|(_, to)| *to).collect();

    let mut result = Vec::new();
    for &head in successor.keys().filter(|id| !targets.contains(id)) {
        let mut chain = vec![head];
        let mut seen = BTreeSet::from([head]);
        let mut current = head;
        while let Some(&next) = successor.get(&current) {
            if !seen.insert(next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        result.push(chain);
    }
    result
}

/// Gaussian kernel density (detections per Hz) at `at`, over sorted `frequencies`
fn frequency_density(frequencies: &[f64], at: f64, sigma: f64) -> f64 {
    let reach = KDE_CUTOFF_SIGMAS * sigma;
    let lo = frequencies.partition_point(|&f| f < at - reach);
    let hi = frequencies.partition_point(|&f| f <= at + reach);
    let norm = 1.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
    frequencies[lo..hi.max(lo)]
        .iter()
        .map(|&f| {
            let z = (f - at) / sigma;
            norm * (-0.5 * z * z).exp()
        })
        .sum()
}

/// Contiguous runs of shared frames within `band`, as (first, last, closest approach)
fn crossing_episodes(a: &Track, b: &Track, band: f64) -> Vec<(u64, u64, u64)> {
    let mut episodes = Vec::new();
    let mut current: Option<(u64, u64, u64, f64)> = None;

    let (da, db) = (a.detections(), b.detections());
    let (mut i, mut j) = (0, 0);
    while i < da.len() && j < db.len() {
        let (x, y) = (&da[i], &db[j]);
        if x.frame_index < y.frame_index {
            i += 1;
            continue;
        }
        if y.frame_index < x.frame_index {
            j += 1;
            continue;
        }

        let distance = (x.frequency - y.frequency).abs();
        if distance <= band {
            current = Some(match current {
                None => (x.frame_index, x.frame_index, x.frame_index, distance),
                Some((start, _, _, best)) if distance < best => {
                    (start, x.frame_index, x.frame_index, distance)
                }
                Some((start, _, closest, best)) => (start, x.frame_index, closest, best),
            });
        } else if let Some((start, end, closest, _)) = current.take() {
            episodes.push((start, end, closest));
        }
        i += 1;
        j += 1;
    }
    if let Some((start, end, closest, _)) = current {
        episodes.push((start, end, closest));
    }
    episodes
}

/// Last `window` detections strictly before `frame`
fn before(track: &Track, frame: u64, window: usize) -> &[Detection] {
    let detections = track.detections();
    let end = detections.partition_point(|d| d.frame_index < frame);
    &detections[end.saturating_sub(window)..end]
}

/// First `window` detections strictly after `frame`
fn after(track: &Track, frame: u64, window: usize) -> &[Detection] {
    let detections = track.detections();
    let start = detections.partition_point(|d| d.frame_index <= frame);
    &detections[start..(start + window).min(detections.len())]
}

fn third_track_in_crossing(
    a: &Track,
    b: &Track,
    start: u64,
    end: u64,
    band: f64,
    all: &[&Track],
) -> bool {
    all.iter()
        .filter(|t| t.id != a.id && t.id != b.id)
        .any(|t| {
            t.window(start, end).iter().any(|d| {
                [a, b].iter().any(|own| {
                    own.detection_at(d.frame_index)
                        .is_some_and(|x| (x.frequency - d.frequency).abs() <= band)
                })
            })
        })
}

/// Swap everything from `cut_frame` on between identities `a` and `b`
fn exchange_tails(store: &mut TrackStore, a: TrackId, b: TrackId, cut_frame: u64) -> bool {
    if a == b || !store.contains(a) || !store.contains(b) {
        return false;
    }
    let (Some(mut track_a), Some(mut track_b)) = (store.remove(a), store.remove(b)) else {
        return false;
    };
    let tail_a = track_a.split_off(cut_frame);
    let tail_b = track_b.split_off(cut_frame);
    track_a.append_after(tail_b);
    track_b.append_after(tail_a);
    store.insert(track_a);
    store.insert(track_b);
    true
}
