use crate::geometry::{Bounds, PolyBounds};
use crate::traces::Trace;
use ahash::AHashSet;
use anyhow::{Context, Result};
use h3o::{CellIndex, LatLng, Resolution};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

/// Hexagonal bucketing resolution (cells of roughly 0.7 km²).
pub const TILE_RESOLUTION: Resolution = Resolution::Eight;

/// One H3 cell with its polygon boundary and bounding box.
#[derive(Debug, Clone)]
pub struct Tile {
    pub cell: CellIndex,
    pub bounds: PolyBounds,
}

pub fn cell_of_point(point: [f64; 2]) -> Result<CellIndex> {
    let latlng = LatLng::new(point[1], point[0])
        .with_context(|| format!("unmappable coordinate [{}, {}]", point[0], point[1]))?;
    Ok(latlng.to_cell(TILE_RESOLUTION))
}

/// The cell boundary as a closed `[lon, lat]` ring.
pub fn cell_ring(cell: CellIndex) -> Vec<[f64; 2]> {
    let boundary = cell.boundary();
    let mut ring: Vec<[f64; 2]> = boundary.iter().map(|vertex| [vertex.lng(), vertex.lat()]).collect();
    if let Some(&first) = ring.first() {
        ring.push(first);
    }
    ring
}

pub fn tile_from_cell(cell: CellIndex) -> Tile {
    Tile {
        cell,
        bounds: PolyBounds::new(vec![cell_ring(cell)]),
    }
}

pub fn tile_from_id(id: u64) -> Result<Tile> {
    let cell = CellIndex::try_from(id).with_context(|| format!("invalid H3 cell id {}", id))?;
    Ok(tile_from_cell(cell))
}

/// Spatial index over a tile set: candidate tiles come from the
/// bounding-box tree, the polygon test confirms.
pub struct TileIndex {
    tiles: Vec<Tile>,
    tree: RTree<GeomWithData<Rectangle<[f64; 2]>, usize>>,
}

impl TileIndex {
    pub fn new(tiles: Vec<Tile>) -> TileIndex {
        let rectangles = tiles
            .iter()
            .enumerate()
            .map(|(index, tile)| {
                let bbox = tile.bounds.bbox();
                GeomWithData::new(Rectangle::from_corners(bbox.min, bbox.max), index)
            })
            .collect();

        TileIndex {
            tiles,
            tree: RTree::bulk_load(rectangles),
        }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles whose polygon contains `point`, with their indices.
    pub fn tiles_containing(
        &self,
        point: [f64; 2],
    ) -> impl Iterator<Item = (usize, &Tile)> + '_ {
        self.tree
            .locate_all_at_point(&point)
            .map(move |hit| (hit.data, &self.tiles[hit.data]))
            .filter(move |(_, tile)| tile.bounds.contains(point))
    }
}

/// Every tile visited by at least one trace element, in cell-id
/// order.
pub fn tiles_from_traces(traces: &[Trace]) -> Result<Vec<Tile>> {
    let mut cells: AHashSet<CellIndex> = AHashSet::new();

    for trace in traces {
        for elem in &trace.elements {
            cells.insert(cell_of_point(elem.point)?);
        }
    }

    let mut sorted: Vec<CellIndex> = cells.into_iter().collect();
    sorted.sort_by_key(|cell| u64::from(*cell));

    Ok(sorted.into_iter().map(tile_from_cell).collect())
}
