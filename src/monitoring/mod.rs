pub mod request_throttler;
