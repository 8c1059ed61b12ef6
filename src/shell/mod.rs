// Composition root for the outbox relay service.
//
// Responsibilities
// - Read config from environment.
// - Instantiate concrete infrastructure implementations.
// - Wire implementations into the enqueue handler and the HTTP router.
// - Spawn background workers (outbox relay, consumption loop).

pub mod config;
pub mod http;
pub mod state;
pub mod workers;
