pub mod init;
pub mod keygen;
pub mod serve;
pub mod version;

pub use init::Init;
pub use keygen::Keygen;
pub use serve::Serve;
pub use version::Version;
