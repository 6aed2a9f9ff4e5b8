// Storage layer for mesh checkpoints

mod mesh_db;

pub use mesh_db::MeshDB;
