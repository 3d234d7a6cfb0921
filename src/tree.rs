use log::{debug, trace};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use ordered_float::OrderedFloat;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

use crate::select::{BoundedTopK, Candidate};
use crate::{Distance, KdTreeError, Metric, Result, Scalar};

/// Query result containing k-nearest neighbours to a query point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    query_index: usize,
    neighbours: Vec<Neighbour>,
}

impl QueryResult {
    pub(crate) fn new(index: usize, neighbours: Vec<Neighbour>) -> Self {
        Self {
            query_index: index,
            neighbours,
        }
    }

    /// Returns the query index from batch query for this result.
    pub fn index(&self) -> usize {
        self.query_index
    }

    /// Returns the nearest neighbours of a query, nearest first.
    pub fn neighbours(&self) -> &[Neighbour] {
        &self.neighbours
    }

    /// Returns the neighbours as `(distance, index)` pairs, nearest first.
    pub fn pairs(&self) -> Vec<(Scalar, usize)> {
        self.neighbours.iter().map(|nb| (nb.dist, nb.idx)).collect()
    }

    /// Number of neighbours found.
    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    /// Returns `true` if no neighbour was found.
    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    /// Consumes ```self``` and returns the query index and the nearest neighbours of that query.
    pub fn take(self) -> (usize, Vec<Neighbour>) {
        (self.query_index, self.neighbours)
    }
}

/// A neighbour resulted from a k-nearest neighbour search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbour {
    idx: usize,
    dist: Scalar,
}

impl Neighbour {
    /// Returns the index of a neighbour, i.e. its row in the indexed point set.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Returns the distance for a neighbour to a query point.
    pub fn dist(&self) -> Scalar {
        self.dist
    }
}

impl From<Candidate> for Neighbour {
    fn from(candidate: Candidate) -> Self {
        Self {
            idx: candidate.identity,
            dist: candidate.distance,
        }
    }
}

/// How the builder treats points that share the median's coordinate on the split axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ties {
    /// The last point of the tied run becomes the node and the other members of the run are left
    /// out of the tree. Their indices are reported by [`KdTree::absorbed`].
    Absorb,
    /// The first point of the tied run becomes the node and the rest go to the right subtree.
    /// Every input point is retained.
    Retain,
}

impl Default for Ties {
    fn default() -> Self {
        Ties::Absorb
    }
}

#[derive(Clone, Copy, Debug)]
struct Node {
    idx: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Read-only handle to a node of a [`KdTree`], for walking the tree by hand.
#[derive(Clone, Copy, Debug)]
pub struct NodeRef<'a> {
    nodes: &'a [Node],
    data: ArrayView2<'a, Scalar>,
    node: usize,
    depth: usize,
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a Node {
        &self.nodes[self.node]
    }

    fn child(&self, child: Option<usize>) -> Option<NodeRef<'a>> {
        child.map(|node| NodeRef {
            nodes: self.nodes,
            data: self.data,
            node,
            depth: self.depth + 1,
        })
    }

    /// Coordinates of the point stored in this node.
    pub fn point(&self) -> ArrayView1<'a, Scalar> {
        self.data.index_axis_move(Axis(0), self.node().idx)
    }

    /// Index of the stored point in the input point set.
    pub fn index(&self) -> usize {
        self.node().idx
    }

    /// Axis this node splits on.
    pub fn axis(&self) -> usize {
        self.node().axis
    }

    /// Distance from the root, which has depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Subtree holding points strictly below this node's coordinate on its axis.
    pub fn left(&self) -> Option<NodeRef<'a>> {
        self.child(self.node().left)
    }

    /// Subtree holding points at or above this node's coordinate on its axis.
    pub fn right(&self) -> Option<NodeRef<'a>> {
        self.child(self.node().right)
    }
}

/// A k-d tree for exact k-nearest neighbour search over a fixed set of points.
///
/// Every level splits at the median of the remaining points along one axis, cycling through the
/// axes from the root down. The tree is immutable once built and can be shared between threads
/// for concurrent queries.
#[derive(Clone, Debug)]
pub struct KdTree<M = Metric> {
    dim: usize,
    metric: M,
    ties: Ties,
    epsilon: Scalar,
    data: Array2<Scalar>,
    nodes: Vec<Node>,
    root: Option<usize>,
    absorbed: Vec<usize>,
    depth: usize,
}

impl KdTree<Metric> {
    /// Builds a tree over the rows of `data` with the Euclidean metric and default settings.
    pub fn new(data: Array2<Scalar>) -> Result<Self> {
        KdTreeBuilder::new().build(data)
    }

    /// Builds a tree over `rows` with the Euclidean metric and default settings.
    ///
    /// Fails if the rows do not all have the same length.
    pub fn from_rows<R: AsRef<[Scalar]>>(rows: &[R]) -> Result<Self> {
        KdTreeBuilder::new().build_rows(rows)
    }
}

enum Link {
    Root,
    Left(usize),
    Right(usize),
}

struct Pending {
    ids: Vec<usize>,
    axis: usize,
    depth: usize,
    link: Link,
}

enum Visit {
    Near(usize),
    Far { node: usize, bound: Scalar },
}

impl<M: Distance> KdTree<M> {
    fn construct(data: Array2<Scalar>, metric: M, ties: Ties, epsilon: Scalar) -> Result<Self> {
        validate_points(&data)?;

        let dim = data.ncols();
        let mut tree = KdTree {
            dim,
            metric,
            ties,
            epsilon,
            nodes: Vec::with_capacity(data.nrows()),
            data,
            root: None,
            absorbed: Vec::new(),
            depth: 0,
        };

        let mut stack = vec![Pending {
            ids: (0..tree.data.nrows()).collect(),
            axis: 0,
            depth: 0,
            link: Link::Root,
        }];

        while let Some(Pending {
            mut ids,
            axis,
            depth,
            link,
        }) = stack.pop()
        {
            if ids.is_empty() {
                continue;
            }

            let (pos, right) = tree.divide(&mut ids, axis);
            let node = tree.nodes.len();
            tree.nodes.push(Node {
                idx: ids[pos],
                axis,
                left: None,
                right: None,
            });
            ids.truncate(pos);

            match link {
                Link::Root => tree.root = Some(node),
                Link::Left(parent) => tree.nodes[parent].left = Some(node),
                Link::Right(parent) => tree.nodes[parent].right = Some(node),
            }
            tree.depth = tree.depth.max(depth + 1);

            let next_axis = (axis + 1) % dim;
            stack.push(Pending {
                ids: right,
                axis: next_axis,
                depth: depth + 1,
                link: Link::Right(node),
            });
            stack.push(Pending {
                ids,
                axis: next_axis,
                depth: depth + 1,
                link: Link::Left(node),
            });
        }

        debug!(
            "built kd-tree: {} points, {} retained, {} absorbed, depth {}",
            tree.data.nrows(),
            tree.nodes.len(),
            tree.absorbed.len(),
            tree.depth
        );

        Ok(tree)
    }

    /// Sorts `ids` along `axis` and picks the median. Returns the position of the median and the
    /// ids that belong to its right subtree. Everything before the returned position belongs to
    /// the left subtree; absorbed ids are moved out of the way first.
    fn divide(&mut self, ids: &mut Vec<usize>, axis: usize) -> (usize, Vec<usize>) {
        let data = &self.data;
        ids.sort_by(|&a, &b| OrderedFloat(data[[a, axis]]).cmp(&OrderedFloat(data[[b, axis]])));

        let value = |pos: usize| data[[ids[pos], axis]];
        let mid = ids.len() / 2;
        let median = value(mid);

        let mut first = mid;
        while first > 0 && value(first - 1) == median {
            first -= 1;
        }
        let mut last = mid;
        while last + 1 < ids.len() && value(last + 1) == median {
            last += 1;
        }

        match self.ties {
            Ties::Absorb => {
                let right = ids.split_off(last + 1);
                self.absorbed.extend(ids.drain(first..last));
                (first, right)
            }
            Ties::Retain => {
                let right = ids.split_off(first + 1);
                (first, right)
            }
        }
    }

    /// Performs the nearest neighbour search for a single query and returns ```k``` neighbours who
    /// are closest to the ```query``` point, nearest first.
    ///
    /// An empty tree or `k == 0` gives an empty result. If `k` exceeds the number of points in
    /// the tree, every point is returned.
    pub fn search(&self, query: ArrayView1<'_, Scalar>, k: usize) -> Result<QueryResult> {
        self.validate_query(query)?;

        let root = match self.root {
            Some(root) if k > 0 => root,
            _ => return Ok(QueryResult::default()),
        };

        let mut selector = BoundedTopK::new(k);
        let mut stack = vec![Visit::Near(root)];
        let (mut visited, mut pruned) = (0usize, 0usize);

        while let Some(visit) = stack.pop() {
            let node = match visit {
                Visit::Near(node) => node,
                Visit::Far { node, bound } => {
                    // Tested only now that the near side has tightened the bound.
                    if bound >= selector.worst_distance() {
                        pruned += 1;
                        continue;
                    }
                    node
                }
            };

            let Node {
                idx,
                axis,
                left,
                right,
            } = self.nodes[node];
            let point = self.data.row(idx);
            let distance = self.metric.distance(point, query)?;
            selector.offer(Candidate::new(idx, distance));
            visited += 1;

            // Exact match and nothing left to improve on.
            if distance <= self.epsilon
                && selector.is_full()
                && selector.worst_distance() <= self.epsilon
            {
                continue;
            }

            let offset = point[axis] - query[axis];
            let (near, far) = if offset < 0. {
                (right, left)
            } else {
                (left, right)
            };

            if let Some(far) = far {
                stack.push(Visit::Far {
                    node: far,
                    bound: self.metric.axis_distance(offset),
                });
            }
            if let Some(near) = near {
                stack.push(Visit::Near(near));
            }
        }

        trace!(
            "k = {}: visited {} of {} nodes, pruned {} subtrees",
            k,
            visited,
            self.nodes.len(),
            pruned
        );

        let neighbours = selector
            .into_sorted_vec()
            .into_iter()
            .map(Neighbour::from)
            .collect();
        Ok(QueryResult::new(0, neighbours))
    }

    /// Returns the single nearest neighbour of `query`, or `None` for an empty tree.
    pub fn nearest(&self, query: ArrayView1<'_, Scalar>) -> Result<Option<Neighbour>> {
        let (_, neighbours) = self.search(query, 1)?.take();
        Ok(neighbours.into_iter().next())
    }

    /// Performs the nearest neighbour search for an array of queries and returns ```k```
    /// neighbours who are closest to the points in the query array.
    ///
    /// Queries run in parallel. Result `i` belongs to row `i` of `queries`.
    pub fn search_batch(
        &self,
        queries: ArrayView2<'_, Scalar>,
        k: usize,
    ) -> Result<Vec<QueryResult>>
    where
        M: Sync,
    {
        if self.dim != 0 && queries.ncols() != self.dim {
            return Err(KdTreeError::DimensionMismatch {
                expected: self.dim,
                found: queries.ncols(),
            });
        }

        let result = queries
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(row, query)| -> Result<QueryResult> {
                let (_, neighbours) = self.search(query, k)?.take();
                Ok(QueryResult::new(row, neighbours))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("batch search: {} queries, k = {}", result.len(), k);
        Ok(result)
    }

    fn validate_query(&self, query: ArrayView1<'_, Scalar>) -> Result<()> {
        // A tree built from no rows at all has no dimension to check against.
        if self.dim != 0 && query.len() != self.dim {
            return Err(KdTreeError::DimensionMismatch {
                expected: self.dim,
                found: query.len(),
            });
        }

        match query.iter().position(|x| !x.is_finite()) {
            Some(axis) => Err(KdTreeError::NonFiniteQuery { axis }),
            None => Ok(()),
        }
    }
}

impl<M> KdTree<M> {
    /// Returns the dimension of the indexed points.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the number of points stored in the tree.
    ///
    /// Smaller than the input size when [`Ties::Absorb`] left points out.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree holds no point.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of the input points that were left out of the tree because they tied with a
    /// median on its split axis. Always empty with [`Ties::Retain`].
    pub fn absorbed(&self) -> &[usize] {
        &self.absorbed
    }

    /// Number of levels in the tree, 0 for an empty tree.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the root node, or `None` for an empty tree.
    pub fn root(&self) -> Option<NodeRef<'_>> {
        self.root.map(|node| NodeRef {
            nodes: &self.nodes,
            data: self.data.view(),
            node,
            depth: 0,
        })
    }

    /// The indexed points, one per row.
    pub fn data(&self) -> ArrayView2<'_, Scalar> {
        self.data.view()
    }

    /// The distance function of this tree.
    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// The tie policy this tree was built with.
    pub fn ties(&self) -> Ties {
        self.ties
    }

    /// Distance under which a point counts as an exact match of the query.
    pub fn exact_match_epsilon(&self) -> Scalar {
        self.epsilon
    }
}

fn validate_points(data: &Array2<Scalar>) -> Result<()> {
    if data.nrows() > 0 && data.ncols() == 0 {
        return Err(KdTreeError::ZeroDimension);
    }

    for (row, point) in data.outer_iter().enumerate() {
        if let Some(axis) = point.iter().position(|x| !x.is_finite()) {
            return Err(KdTreeError::NonFinite { row, axis });
        }
    }

    Ok(())
}

/// A build struct for initialising a new k-d tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KdTreeBuilder<M = Metric> {
    metric: M,
    ties: Option<Ties>,
    epsilon: Option<Scalar>,
}

impl Default for KdTreeBuilder<Metric> {
    /// Creates a builder with the Euclidean metric, [`Ties::Absorb`] and an exact-match epsilon of
    /// `1e-6`.
    fn default() -> Self {
        Self {
            metric: Metric::Euclidean,
            ties: None,
            epsilon: None,
        }
    }
}

impl KdTreeBuilder<Metric> {
    /// Creates a builder with default parameters.
    pub fn new() -> Self {
        Self {
            ..Default::default()
        }
    }
}

impl<M> KdTreeBuilder<M> {
    /// Sets the distance function for a tree.
    pub fn metric<N: Distance>(self, metric: N) -> KdTreeBuilder<N> {
        KdTreeBuilder {
            metric,
            ties: self.ties,
            epsilon: self.epsilon,
        }
    }

    /// Sets how points sharing the median's coordinate are handled.
    pub fn ties(mut self, ties: Ties) -> Self {
        self.ties = Some(ties);
        self
    }

    /// Sets the distance under which a node counts as an exact match of the query.
    pub fn exact_match_epsilon(mut self, epsilon: Scalar) -> Self {
        self.epsilon = Some(epsilon);
        self
    }
}

impl<M: Distance> KdTreeBuilder<M> {
    /// Constructs a k-d tree over the rows of `data`.
    pub fn build(self, data: Array2<Scalar>) -> Result<KdTree<M>> {
        KdTree::construct(
            data,
            self.metric,
            self.ties.unwrap_or_default(),
            self.epsilon.unwrap_or(1e-6),
        )
    }

    /// Constructs a k-d tree over `rows`, checking that they all have the same length.
    pub fn build_rows<R: AsRef<[Scalar]>>(self, rows: &[R]) -> Result<KdTree<M>> {
        let dim = rows.first().map_or(0, |row| row.as_ref().len());
        let mut flat = Vec::with_capacity(rows.len() * dim);

        for (row, point) in rows.iter().enumerate() {
            let point = point.as_ref();
            if point.len() != dim {
                return Err(KdTreeError::RaggedRow {
                    row,
                    expected: dim,
                    found: point.len(),
                });
            }
            flat.extend_from_slice(point);
        }

        let data = Array2::from_shape_vec((rows.len(), dim), flat)?;
        self.build(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn walk<'a>(node: NodeRef<'a>, out: &mut Vec<NodeRef<'a>>) {
        out.push(node);
        if let Some(left) = node.left() {
            walk(left, out);
        }
        if let Some(right) = node.right() {
            walk(right, out);
        }
    }

    #[test]
    fn test_divide_picks_lower_median() {
        let data = array![[13., 10.], [16., 14.], [14., 11.], [11., 18.]];
        let mut tree = KdTree::new(Array2::zeros((0, 2))).unwrap();
        tree.data = data;

        let mut ids = vec![0, 1, 2, 3];
        let (pos, right) = tree.divide(&mut ids, 0);
        assert_eq!(ids[pos], 2);
        assert_eq!(&ids[..pos], &[3, 0]);
        assert_eq!(right, vec![1]);
    }

    #[test]
    fn test_divide_absorbs_tied_run() {
        let data = array![[1., 0.], [2., 1.], [2., 2.], [2., 3.], [3., 4.]];
        let mut tree = KdTree::new(Array2::zeros((0, 2))).unwrap();
        tree.data = data;

        let mut ids = vec![0, 1, 2, 3, 4];
        let (pos, right) = tree.divide(&mut ids, 0);
        assert_eq!(ids[pos], 3);
        assert_eq!(&ids[..pos], &[0]);
        assert_eq!(right, vec![4]);
        assert_eq!(tree.absorbed, vec![1, 2]);
    }

    #[test]
    fn test_divide_retains_tied_run() {
        let data = array![[1., 0.], [2., 1.], [2., 2.], [2., 3.], [3., 4.]];
        let mut tree = KdTreeBuilder::new()
            .ties(Ties::Retain)
            .build(Array2::zeros((0, 2)))
            .unwrap();
        tree.data = data;

        let mut ids = vec![0, 1, 2, 3, 4];
        let (pos, right) = tree.divide(&mut ids, 0);
        assert_eq!(ids[pos], 1);
        assert_eq!(&ids[..pos], &[0]);
        assert_eq!(right, vec![2, 3, 4]);
        assert!(tree.absorbed.is_empty());
    }

    #[test]
    fn test_tree_shape() {
        let tree = KdTree::new(array![
            [2., 3.],
            [5., 4.],
            [9., 6.],
            [4., 7.],
            [8., 1.],
            [7., 2.]
        ])
        .unwrap();

        let root = tree.root().unwrap();
        assert_eq!(root.index(), 5);
        assert_eq!(root.axis(), 0);
        assert_eq!(root.point(), array![7., 2.]);

        let left = root.left().unwrap();
        assert_eq!(left.index(), 1);
        assert_eq!(left.axis(), 1);
        assert_eq!(left.left().unwrap().index(), 0);
        assert_eq!(left.right().unwrap().index(), 3);

        let right = root.right().unwrap();
        assert_eq!(right.index(), 2);
        assert_eq!(right.left().unwrap().index(), 4);
        assert!(right.right().is_none());

        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn test_point_outlives_node_handle() {
        let tree = KdTree::new(array![[2., 3.], [5., 4.], [9., 6.], [4., 7.]]).unwrap();

        let points: Vec<_> = {
            let root = tree.root().unwrap();
            vec![root.point(), root.left().unwrap().point()]
        };
        assert_eq!(points[0], array![5., 4.]);
        assert_eq!(points[1], array![4., 7.]);
    }

    #[test]
    fn test_split_invariant_and_axis_cycling() {
        let mut rng = oorandom::Rand64::new(7);
        let data = Array2::from_shape_simple_fn((500, 3), || (rng.rand_range(0..20)) as f64);
        let n = data.nrows();

        for &ties in &[Ties::Absorb, Ties::Retain] {
            let tree = KdTreeBuilder::new().ties(ties).build(data.clone()).unwrap();
            let mut nodes = Vec::new();
            walk(tree.root().unwrap(), &mut nodes);

            assert_eq!(nodes.len(), tree.len());
            assert_eq!(tree.len() + tree.absorbed().len(), n);
            if ties == Ties::Retain {
                assert_eq!(tree.len(), n);
            }

            for node in &nodes {
                assert_eq!(node.axis(), node.depth() % 3);

                let value = node.point()[node.axis()];
                let mut below = Vec::new();
                if let Some(left) = node.left() {
                    walk(left, &mut below);
                }
                for other in &below {
                    assert!(other.point()[node.axis()] < value);
                }

                let mut above = Vec::new();
                if let Some(right) = node.right() {
                    walk(right, &mut above);
                }
                for other in &above {
                    assert!(other.point()[node.axis()] >= value);
                }
            }
        }
    }

    #[test]
    fn test_degenerate_input_does_not_overflow() {
        let data = Array2::from_shape_fn((100_000, 1), |(i, _)| i as f64);
        let tree = KdTreeBuilder::new().ties(Ties::Retain).build(data).unwrap();
        assert_eq!(tree.len(), 100_000);

        let same = Array2::from_elem((4_000, 2), 1.);
        let tree = KdTreeBuilder::new().ties(Ties::Retain).build(same).unwrap();
        assert_eq!(tree.len(), 4_000);
        assert_eq!(tree.depth(), 4_000);

        let result = tree.search(array![1., 1.].view(), 3).unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.neighbours().iter().all(|nb| nb.dist() == 0.));
    }
}
