//! Integration tests for the batch pipeline, the OpenWeatherMap client and
//! the HTTP API.

mod stub_source;
mod upstream;
