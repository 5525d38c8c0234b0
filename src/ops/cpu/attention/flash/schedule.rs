//! Tile scheduling
//!
//! Splits both sequence dimensions into fixed-size tiles (the last one may be
//! shorter) and enumerates the iteration space in the order batch → head →
//! query tile → key tile. Key tiles for one query tile always come out in
//! increasing position order, which the causal early exit relies on.

use super::shape::AttentionShape;
use crate::config::FlashAttentionConfig;
use crate::error::Result;
use std::ops::Range;

/// Half-open `[start, end)` range of sequence positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub start: usize,
    pub end: usize,
}

impl TileRange {
    /// Tile `index` of a sequence of `seq_len` positions cut into `tile_size` pieces.
    pub fn nth(index: usize, tile_size: usize, seq_len: usize) -> Self {
        let start = index.saturating_mul(tile_size).min(seq_len);
        let end = start.saturating_add(tile_size).min(seq_len);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn positions(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Element range of these rows in a row-major `[N, width]` buffer.
    pub fn elements(&self, width: usize) -> Range<usize> {
        self.start * width..self.end * width
    }
}

/// One independent unit of work: a query tile of one (batch, head).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub batch: usize,
    pub head: usize,
    pub query_tile: usize,
    pub query: TileRange,
}

impl WorkItem {
    /// Flat (batch, head) index into `[B, H, ..]` buffers.
    pub fn batch_head(&self, heads: usize) -> usize {
        self.batch * heads + self.head
    }
}

/// Resolved shape plus tile geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileScheduler {
    shape: AttentionShape,
    query_tile_size: usize,
    key_tile_size: usize,
}

impl TileScheduler {
    pub fn new(shape: AttentionShape, config: &FlashAttentionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shape,
            query_tile_size: config.query_tile_size,
            key_tile_size: config.key_tile_size,
        })
    }

    pub fn shape(&self) -> &AttentionShape {
        &self.shape
    }

    pub fn query_tile_size(&self) -> usize {
        self.query_tile_size
    }

    pub fn key_tile_size(&self) -> usize {
        self.key_tile_size
    }

    pub fn num_query_tiles(&self) -> usize {
        self.shape.seq_len_q.div_ceil(self.query_tile_size)
    }

    pub fn num_key_tiles(&self) -> usize {
        self.shape.seq_len_k.div_ceil(self.key_tile_size)
    }

    pub fn query_tile(&self, index: usize) -> TileRange {
        TileRange::nth(index, self.query_tile_size, self.shape.seq_len_q)
    }

    pub fn key_tile(&self, index: usize) -> TileRange {
        TileRange::nth(index, self.key_tile_size, self.shape.seq_len_k)
    }

    /// Work item for query tile `query_tile` of the flat (batch, head) index.
    pub fn work_item(&self, batch_head: usize, query_tile: usize) -> WorkItem {
        WorkItem {
            batch: batch_head / self.shape.heads,
            head: batch_head % self.shape.heads,
            query_tile,
            query: self.query_tile(query_tile),
        }
    }

    /// All work items, batch outermost, then head, then query tile.
    pub fn work_items(&self) -> impl Iterator<Item = WorkItem> + '_ {
        let tiles = self.num_query_tiles();
        (0..self.shape.batch_heads())
            .flat_map(move |bh| (0..tiles).map(move |i| self.work_item(bh, i)))
    }

    /// Key tiles a query tile has to visit, in increasing position order.
    ///
    /// Under causal masking a key tile starting at or past `query.end` is
    /// masked for every row of the query tile, and so is every tile after it.
    pub fn key_tiles(
        &self,
        query: TileRange,
        causal: bool,
    ) -> impl Iterator<Item = TileRange> + '_ {
        (0..self.num_key_tiles())
            .map(move |j| self.key_tile(j))
            .take_while(move |key| !causal || key.start < query.end)
    }

    /// Full `(work item, key tile)` iteration space in b → h → i → j order.
    pub fn schedule(&self, causal: bool) -> impl Iterator<Item = (WorkItem, TileRange)> + '_ {
        self.work_items().flat_map(move |item| {
            self.key_tiles(item.query, causal)
                .map(move |key| (item, key))
        })
    }

    /// Element range of a work item's rows in the flat `[B, H, S_q, D]` output.
    pub fn output_range(&self, item: &WorkItem) -> Range<usize> {
        let base = item.batch_head(self.shape.heads) * self.shape.q_head_len();
        let rows = item.query.elements(self.shape.head_dim);
        base + rows.start..base + rows.end
    }

    /// Element range of a work item's rows in the flat `[B, H, S_q]` LSE buffer.
    pub fn lse_range(&self, item: &WorkItem) -> Range<usize> {
        let base = item.batch_head(self.shape.heads) * self.shape.seq_len_q;
        base + item.query.start..base + item.query.end
    }
}
