use ndarray::Array2;
use robust_pca::{robust_pca, PcaOptions};

fn main() {
    env_logger::init();

    // 30 points on a noisy line in 3-d, plus two points well off it.
    let mut data = Array2::from_shape_fn((32, 3), |(i, j)| {
        let t = i as f64 / 3.0;
        t * (j as f64 + 1.0) + (((i * 13 + j * 7) % 11) as f64 - 5.0) * 0.05
    });
    data.row_mut(30).assign(&ndarray::arr1(&[2.0, 30.0, -5.0]));
    data.row_mut(31).assign(&ndarray::arr1(&[40.0, 80.0, 120.0]));

    let result = match robust_pca(data.view(), &PcaOptions::new().with_bdp(0.25)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("robust PCA failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("Retained components: {}", result.num_components);
    println!("Excluded from the fit: {:?}", result.excluded_rows());
    println!("{:>5} {:>10} {:>10}", "row", "SD", "OD");
    for (row, (sd, od)) in result
        .kept_rows
        .iter()
        .zip(result.score_distance.iter().zip(result.orthogonal_distance.iter()))
    {
        println!("{:>5} {:>10.3} {:>10.3}", row, sd, od);
    }
}
