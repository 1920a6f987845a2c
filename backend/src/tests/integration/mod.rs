// End-to-end engine tests over the in-memory repository
mod dispatch;
mod pipeline;
mod retries;
