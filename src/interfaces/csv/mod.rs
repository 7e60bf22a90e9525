pub mod feed_reader;
pub mod wallet_writer;
