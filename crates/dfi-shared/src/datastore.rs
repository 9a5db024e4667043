use crate::error::DatastoreError;
use crate::piece::Piece;
use crate::post::Post;

/// Read access to a post catalogue, as consumed by the network layer.
///
/// Pages are zero-based. A missing record is [`DatastoreError::NotFound`],
/// never a backend error.
pub trait Datastore: Send + Sync {
    /// Piece `id`: the first `PIECE_SIZE` posts, by ascending id, whose id is
    /// greater than `id * PIECE_SIZE`. For a gapless catalogue that is exactly
    /// the ids in `(id * PIECE_SIZE, (id + 1) * PIECE_SIZE]`.
    /// Posts are only kept in the result when `include_posts` is set; the
    /// hash is always computed.
    fn query_piece(&self, id: u32, include_posts: bool) -> Result<Piece, DatastoreError>;

    /// Highest post id, which is also the number of posts for a gapless catalogue.
    fn post_count(&self) -> Result<u64, DatastoreError>;

    fn search(&self, query: &str, page: u32) -> Result<Vec<Post>, DatastoreError>;

    fn query_recent(&self, page: u32) -> Result<Vec<Post>, DatastoreError>;

    fn query_popular(&self, page: u32) -> Result<Vec<Post>, DatastoreError>;

    /// Title completions for a prefix.
    fn suggest(&self, prefix: &str) -> Result<Vec<String>, DatastoreError>;
}
