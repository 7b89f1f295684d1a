// The building blocks of the event engine, from plain geometry up to the
// lifecycle manager. Everything here is synchronous and frame-local; the
// orchestration lives in `pipeline` and `parallel_pipeline`.

pub mod event;
pub mod event_set;
pub mod features;
pub mod geometry;
pub mod hough;
pub mod image_data;
pub mod kalman;
pub mod lifecycle;
pub mod property_vector;
pub mod region;
pub mod tracker;
pub mod winner;
