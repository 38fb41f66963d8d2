/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `events`: Event publishing endpoint

pub mod events;
pub mod health;
