use kdnn::{KdTree, KdTreeBuilder, Metric, Ties};
use ndarray::{Array, Array1, Array2};

// In this example, we generate a random array of 10000 points in a 5-dimensional Euclidean space
// and build a k-d tree over it. We then search the 10 nearest neighbours of a single query, and
// of 100 queries at once. The batch search runs the queries in parallel.
fn random() {
    let mut rng = oorandom::Rand64::new(0);
    let data = Array::from_shape_simple_fn((10000, 5), || rng.rand_float());
    let tree = KdTree::new(data).expect("random points are finite");

    let query = Array1::from_shape_simple_fn(5, || rng.rand_float());
    let result = tree.search(query.view(), 10).expect("query has the tree's dimension");
    for (dist, idx) in result.pairs() {
        println!("{:>6}  {:.5}", idx, dist);
    }

    let queries = Array2::from_shape_simple_fn((100, 5), || rng.rand_float());
    let results = tree
        .search_batch(queries.view(), 10)
        .expect("queries have the tree's dimension");
    println!("> searched {} queries", results.len());
}

// Points on an integer grid share many coordinates. With the default settings the builder leaves
// out points that tie with a median on its split axis; `Ties::Retain` keeps all of them.
fn grid() {
    let data = Array2::from_shape_fn((400, 2), |(i, j)| {
        if j == 0 {
            (i / 20) as f64
        } else {
            (i % 20) as f64
        }
    });

    let absorbing = KdTree::new(data.clone()).expect("grid points are finite");
    println!(
        "> absorb: {} of {} points retained",
        absorbing.len(),
        data.nrows()
    );

    let retaining = KdTreeBuilder::new()
        .metric(Metric::Manhattan)
        .ties(Ties::Retain)
        .build(data)
        .expect("grid points are finite");
    println!("> retain: {} points retained", retaining.len());
}

fn main() {
    random();
    grid();
}
