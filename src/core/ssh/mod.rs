mod client;

pub use client::SshTarget;
