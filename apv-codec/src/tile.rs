//! Tile geometry and the tile-parallel work orchestrator.
//!
//! Tiles are rectangular regions in macroblock units that partition the frame
//! exactly; they share no coder state, which is what makes them the unit of
//! parallelism. Workers claim pending tiles from a mutex-guarded state array
//! and each tile's result lands in its own slot, so assembled output order is
//! tile-index order regardless of completion order.

use parking_lot::Mutex;
use rayon::ThreadPool;
use tracing::warn;

use apv_core::ChromaFormat;

use crate::error::{ApvError, Result};
use crate::types::MB_SIZE;

/// Thread pool configuration for tile-parallel coding.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Number of worker threads (0 = auto-detect from CPU cores).
    pub num_threads: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self { num_threads: 0 }
    }
}

impl ThreadConfig {
    /// Configuration with an explicit thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self { num_threads }
    }

    /// Effective number of worker threads.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }
}

/// One tile's position and extent, in both macroblock and sample units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    /// Raster index within the tile grid.
    pub index: usize,
    /// Origin in luma samples.
    pub x: u32,
    pub y: u32,
    /// Extent in luma samples; edge tiles shrink to the frame boundary.
    pub width: u32,
    pub height: u32,
}

impl TileGeometry {
    /// The tile's rectangle in one component's sample space:
    /// `(x, y, width, height)` after chroma subsampling.
    pub fn component_rect(&self, chroma: ChromaFormat, component: usize) -> (u32, u32, u32, u32) {
        let (sx, sy) = chroma.subsampling(component);
        (self.x / sx, self.y / sy, self.width / sx, self.height / sy)
    }

    /// Samples in the tile across all components.
    pub fn total_samples(&self, chroma: ChromaFormat) -> u64 {
        (0..chroma.num_components())
            .map(|c| {
                let (_, _, w, h) = self.component_rect(chroma, c);
                w as u64 * h as u64
            })
            .sum()
    }
}

/// Compute the raster-order tile grid of a frame.
///
/// `tile_width_mb`/`tile_height_mb` are in macroblock units; the frame
/// dimensions must be macroblock-aligned.
pub fn compute_tile_grid(
    frame_width: u32,
    frame_height: u32,
    tile_width_mb: u32,
    tile_height_mb: u32,
) -> Result<Vec<TileGeometry>> {
    if frame_width == 0 || frame_height == 0 {
        return Err(ApvError::invalid_arg("zero frame dimension"));
    }
    if frame_width % MB_SIZE != 0 || frame_height % MB_SIZE != 0 {
        return Err(ApvError::invalid_arg(format!(
            "frame {frame_width}x{frame_height} not aligned to {MB_SIZE}-sample macroblocks"
        )));
    }
    if tile_width_mb == 0 || tile_height_mb == 0 {
        return Err(ApvError::invalid_arg("zero tile dimension"));
    }

    let tile_w = tile_width_mb * MB_SIZE;
    let tile_h = tile_height_mb * MB_SIZE;
    let cols = frame_width.div_ceil(tile_w);
    let rows = frame_height.div_ceil(tile_h);

    let mut tiles = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x = col * tile_w;
            let y = row * tile_h;
            tiles.push(TileGeometry {
                index: tiles.len(),
                x,
                y,
                width: tile_w.min(frame_width - x),
                height: tile_h.min(frame_height - y),
            });
        }
    }
    Ok(tiles)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileState {
    Pending,
    Assigned,
    Done,
}

/// Worker pool dispatching one task per tile.
pub struct TilePool {
    pool: ThreadPool,
}

impl TilePool {
    pub fn new(config: &ThreadConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .thread_name(|idx| format!("tile-{idx}"))
            .build()
            .map_err(|e| ApvError::WorkerFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Number of pool threads.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` once per tile and collect results in tile-index order.
    ///
    /// Workers repeatedly claim the lowest-index pending tile under the state
    /// lock. A failing tile finishes its task, records its error, and stops
    /// further claims; the lowest failing tile index wins and its error is
    /// returned after every worker has joined.
    pub fn run_tiles<T, F>(&self, num_tiles: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        if num_tiles == 0 {
            return Ok(Vec::new());
        }
        let states = Mutex::new(vec![TileState::Pending; num_tiles]);
        let results: Mutex<Vec<Option<T>>> = Mutex::new((0..num_tiles).map(|_| None).collect());
        let failure: Mutex<Option<(usize, ApvError)>> = Mutex::new(None);
        let workers = self.pool.current_num_threads().min(num_tiles).max(1);

        self.pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| loop {
                    if failure.lock().is_some() {
                        break;
                    }
                    let idx = {
                        let mut st = states.lock();
                        match st.iter().position(|s| *s == TileState::Pending) {
                            Some(i) => {
                                st[i] = TileState::Assigned;
                                i
                            }
                            None => break,
                        }
                    };
                    match task(idx) {
                        Ok(value) => {
                            results.lock()[idx] = Some(value);
                            states.lock()[idx] = TileState::Done;
                        }
                        Err(err) => {
                            let mut slot = failure.lock();
                            match &*slot {
                                Some((first, _)) if *first <= idx => {}
                                _ => *slot = Some((idx, err)),
                            }
                        }
                    }
                });
            }
        });

        if let Some((tile, err)) = failure.into_inner() {
            warn!(tile, error = %err, "tile task failed");
            return Err(err);
        }
        results
            .into_inner()
            .into_iter()
            .map(|r| r.ok_or_else(|| ApvError::WorkerFailed("tile result missing".into())))
            .collect()
    }
}
