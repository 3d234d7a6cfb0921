//! A library for exact nearest neighbour search based on a median-split k-d tree.
//!
//! The tree is built once from a rectangular point set and is immutable afterwards. Each point
//! is identified by its row in the input, and queries return those identities ranked by
//! distance.
//!
//! ```
//! use kdnn::KdTree;
//! use ndarray::array;
//!
//! let data = array![[2., 3.], [5., 4.], [9., 6.], [4., 7.], [8., 1.], [7., 2.]];
//! let tree = KdTree::new(data).unwrap();
//!
//! let result = tree.search(array![9., 2.].view(), 1).unwrap();
//! assert_eq!(result.neighbours()[0].index(), 4);
//! ```
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    broken_intra_doc_links
)]

type Scalar = f64;

mod error;
pub use error::{KdTreeError, Result};

mod metric;
pub use metric::{Distance, FnMetric, Metric};

mod select;
pub use select::{BoundedTopK, Candidate};


mod tree;
pub use tree::{KdTree, KdTreeBuilder, Neighbour, NodeRef, QueryResult, Ties};
