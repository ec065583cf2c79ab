///! Functional components of the star map pipeline

pub mod cache;
pub mod clock;
pub mod janitor;
pub mod renderer;
pub mod sky;
pub mod storage;
