mod common;

use common::assertions::assert_error_kind;

use ndarray::{array, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use patchguard::index::distance::squared_euclidean;
use patchguard::index::{FlatL2Index, NearestNeighborIndex};

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
}

// ─── Distance tests ───

#[test]
fn test_squared_euclidean_known_values() {
    assert_eq!(squared_euclidean(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 27.0);
    assert_eq!(squared_euclidean(&[0.5, -0.5], &[0.5, -0.5]), 0.0);
}

// ─── Flat index search ───

#[test]
fn test_nearest_matches_brute_force() {
    let members = random_matrix(200, 16, 42);
    let queries = random_matrix(50, 16, 43);
    let index = FlatL2Index::build(members.view()).unwrap();

    let nearest = index.nearest_distances(queries.view()).unwrap();
    for (q, query) in queries.rows().into_iter().enumerate() {
        let expected = members
            .rows()
            .into_iter()
            .map(|m| squared_euclidean(query.as_slice().unwrap(), m.as_slice().unwrap()))
            .fold(f32::INFINITY, f32::min);
        assert_eq!(nearest[q], expected, "query {q}");
    }
}

#[test]
fn test_knn_is_sorted_and_consistent_with_k1() {
    let members = random_matrix(100, 8, 7);
    let queries = random_matrix(10, 8, 8);
    let index = FlatL2Index::build(members.view()).unwrap();

    let top5 = index.search(queries.view(), 5).unwrap();
    let top1 = index.search(queries.view(), 1).unwrap();
    assert_eq!(top5.distances.dim(), (10, 5));

    for q in 0..10 {
        let row = top5.distances.row(q);
        assert!(row.windows(2).into_iter().all(|w| w[0] <= w[1]));
        assert_eq!(top5.distances[[q, 0]], top1.distances[[q, 0]]);
        assert_eq!(top5.labels[[q, 0]], top1.labels[[q, 0]]);
    }
}

#[test]
fn test_member_is_its_own_nearest() {
    let members = random_matrix(30, 4, 1);
    let index = FlatL2Index::build(members.view()).unwrap();
    let result = index.search(members.view(), 1).unwrap();
    for i in 0..30 {
        assert_eq!(result.labels[[i, 0]], i);
        assert_eq!(result.distances[[i, 0]], 0.0);
    }
}

#[test]
fn test_k_is_clamped_to_index_size() {
    let index = FlatL2Index::build(array![[0.0f32, 0.0], [1.0, 1.0]].view()).unwrap();
    let result = index.search(array![[0.2f32, 0.2]].view(), 10).unwrap();
    assert_eq!(result.distances.dim(), (1, 2));
    assert_eq!(result.labels[[0, 0]], 0);
    assert_eq!(result.labels[[0, 1]], 1);
}

#[test]
fn test_ties_resolve_to_lowest_position() {
    let index = FlatL2Index::build(array![[1.0f32, 0.0], [-1.0, 0.0]].view()).unwrap();
    let result = index.search(array![[0.0f32, 0.0]].view(), 1).unwrap();
    assert_eq!(result.labels[[0, 0]], 0);
    assert_eq!(result.distances[[0, 0]], 1.0);
}

// ─── Errors ───

#[test]
fn test_empty_index_search_fails() {
    let index = FlatL2Index::new(3);
    assert!(index.is_empty());
    assert_error_kind(index.search(array![[0.0f32, 0.0, 0.0]].view(), 1), "index");
}

#[test]
fn test_dimension_mismatch() {
    let mut index = FlatL2Index::build(array![[0.0f32, 0.0]].view()).unwrap();
    assert_error_kind(
        index.search(array![[0.0f32, 0.0, 0.0]].view(), 1),
        "dimension_mismatch",
    );
    assert_error_kind(index.add(array![[1.0f32]].view()), "dimension_mismatch");
}

#[test]
fn test_zero_k_fails() {
    let index = FlatL2Index::build(array![[0.0f32]].view()).unwrap();
    assert_error_kind(index.search(array![[0.0f32]].view(), 0), "index");
}

// ─── Persistence ───

#[test]
fn test_serialized_index_answers_identically() {
    let members = random_matrix(64, 12, 99);
    let queries = random_matrix(20, 12, 100);
    let index = FlatL2Index::build(members.view()).unwrap();

    let restored = FlatL2Index::from_bytes(&index.to_bytes().unwrap()).unwrap();
    assert_eq!(restored, index);
    assert_eq!(
        restored.search(queries.view(), 3).unwrap(),
        index.search(queries.view(), 3).unwrap()
    );
}

#[test]
fn test_malformed_bytes_are_rejected() {
    assert!(FlatL2Index::from_bytes(b"nonsense").is_err());
}
