// Bezier route networks: resampled paths, junctions, path followers and ribbon meshes.

pub mod engine;
