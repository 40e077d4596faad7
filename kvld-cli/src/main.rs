use akaze::{Akaze, KeyPoint};
use bitarray::{BitArray, Hamming};
use image::DynamicImage;
use kvld::{GrayFloatImage, Kvld, KvldError, KvldParameters};
use kvld_core::{CandidateMatch, Keypoint};
use log::*;
use nalgebra::Point2;
use space::{Knn, LinearKnn};
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use two_view::{ModelEstimator, ModelKind};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "kvld",
    about = "Matches two images and keeps the matches their neighbors agree with"
)]
struct Opt {
    /// The akaze threshold to use.
    ///
    /// 0.01 will be very sparse and 0.0001 will be very dense.
    #[structopt(long, default_value = "0.001")]
    akaze_threshold: f64,
    /// Only keep a match if its descriptor distance is below this ratio of
    /// the distance to the second best match.
    #[structopt(long)]
    lowes_ratio: Option<f64>,
    /// The number of K-VLD attempts before settling for the last one.
    #[structopt(long, default_value = "5")]
    max_attempts: usize,
    /// A JSON file with the K-VLD parameters.
    #[structopt(short, long, parse(from_os_str))]
    settings: Option<PathBuf>,
    /// The model inlier threshold in pixels.
    ///
    /// With 0 the threshold is chosen automatically.
    #[structopt(long, default_value = "0.0")]
    precision: f64,
    /// Verify with a homography instead of a fundamental matrix.
    #[structopt(long)]
    homography: bool,
    /// The seed of the model estimator's sampling.
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// The first image.
    #[structopt(parse(from_os_str))]
    first: PathBuf,
    /// The second image.
    #[structopt(parse(from_os_str))]
    second: PathBuf,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let (image1, image2) = match (open(&opt.first), open(&opt.second)) {
        (Some(image1), Some(image2)) => (image1, image2),
        _ => std::process::exit(1),
    };

    let settings = load_settings(opt.settings.as_deref());

    let akaze = Akaze::new(opt.akaze_threshold);
    let (key_points1, descriptors1) = akaze.extract(&image1);
    let (key_points2, descriptors2) = akaze.extract(&image2);
    info!(
        "extracted {} and {} features",
        key_points1.len(),
        key_points2.len()
    );
    let keypoints1 = convert(&key_points1, 0);
    let keypoints2 = convert(&key_points2, 1);
    let candidates = symmetric_matching(&descriptors1, &descriptors2, opt.lowes_ratio);
    println!("initial matches: {}", candidates.len());

    let gray1 = GrayFloatImage::from_dynamic(&image1);
    let gray2 = GrayFloatImage::from_dynamic(&image2);
    let kvld = Kvld::new(settings).max_attempts(opt.max_attempts);
    let filtered = match kvld.filter(&gray1, &gray2, &keypoints1, &keypoints2, &candidates) {
        Ok(filtered) => {
            info!(
                "K-VLD inlier rate {:.3} with k {}",
                filtered.inlier_rate, filtered.parameters.k
            );
            filtered.matches
        }
        Err(e @ KvldError::InsufficientMatches { .. }) => {
            warn!("{}", e);
            Vec::new()
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    println!("K-VLD matches: {}", filtered.len());

    let kind = if opt.homography {
        ModelKind::Homography
    } else {
        ModelKind::Fundamental
    };
    let estimator = ModelEstimator::new(kind)
        .precision(opt.precision)
        .seed(opt.seed);
    match estimator.fit(gray2.dimensions(), &keypoints1, &keypoints2, &filtered) {
        Ok(model) => {
            println!("model matches: {}", model.inliers.len());
            println!("threshold: {:.3} px", model.threshold);
            println!("{:?} matrix:{}", model.kind, model.matrix);
        }
        Err(e) => {
            warn!("{}, the K-VLD matches stay unverified", e);
            println!("model matches: 0");
        }
    }
}

/// Reads K-VLD parameters from a JSON file, falling back to the defaults.
///
/// Fields missing from the file keep their default value.
fn load_settings(path: Option<&Path>) -> KvldParameters {
    let path = match path {
        Some(path) => path,
        None => {
            info!("used default K-VLD settings");
            return KvldParameters::default();
        }
    };
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(
                "failed to open settings {}: {}, using defaults",
                path.display(),
                e
            );
            return KvldParameters::default();
        }
    };
    match serde_json::from_reader(std::io::BufReader::new(file)) {
        Ok(settings) => {
            info!("loaded K-VLD settings from {}", path.display());
            settings
        }
        Err(e) => {
            warn!(
                "failed to parse settings {}: {}, using defaults",
                path.display(),
                e
            );
            KvldParameters::default()
        }
    }
}

fn open(path: &Path) -> Option<DynamicImage> {
    match image::open(path) {
        Ok(image) => Some(image),
        Err(e) => {
            error!("failed to open {}: {}", path.display(), e);
            None
        }
    }
}

fn convert(key_points: &[KeyPoint], image: u32) -> Vec<Keypoint> {
    key_points
        .iter()
        .map(|kp| {
            let (x, y) = kp.point;
            Keypoint::new(
                Point2::new(f64::from(x), f64::from(y)),
                f64::from(kp.size),
                f64::from(kp.angle),
            )
            .in_image(image)
        })
        .collect()
}

/// Best match of every descriptor of `a` among the descriptors of `b`.
fn matching(
    a_descriptors: &[BitArray<64>],
    b_descriptors: &[BitArray<64>],
    lowes_ratio: Option<f64>,
) -> Vec<Option<usize>> {
    let knn_b = LinearKnn {
        metric: Hamming,
        iter: b_descriptors.iter(),
    };
    (0..a_descriptors.len())
        .map(|a_feature| {
            let knn = knn_b.knn(&a_descriptors[a_feature], 2);
            let best = knn.get(0)?;
            match (lowes_ratio, knn.get(1)) {
                (Some(ratio), Some(second))
                    if f64::from(best.distance) >= ratio * f64::from(second.distance) =>
                {
                    None
                }
                _ => Some(best.index),
            }
        })
        .collect()
}

/// Keeps the matches that are the best match in both directions.
fn symmetric_matching(
    a: &[BitArray<64>],
    b: &[BitArray<64>],
    lowes_ratio: Option<f64>,
) -> Vec<CandidateMatch> {
    let forward_matches = matching(a, b, lowes_ratio);
    let reverse_matches = matching(b, a, lowes_ratio);
    forward_matches
        .into_iter()
        .enumerate()
        .filter_map(|(aix, bix)| {
            bix.filter(|&bix| reverse_matches[bix] == Some(aix))
                .map(|bix| CandidateMatch(aix, bix))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn settings_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn partial_settings_keep_defaults() {
        let file = settings_file(r#"{ "k": 5, "geometry": false }"#);
        let settings = load_settings(Some(file.path()));
        assert_eq!(
            settings,
            KvldParameters {
                k: 5,
                geometry: false,
                ..Default::default()
            }
        );
    }

    #[test]
    fn unreadable_settings_fall_back_to_defaults() {
        let _ = pretty_env_logger::try_init_timed();
        let file = settings_file(r#"{ "k": "three" "#);
        assert_eq!(load_settings(Some(file.path())), KvldParameters::default());
        let missing = file.path().with_extension("missing");
        assert_eq!(load_settings(Some(&missing)), KvldParameters::default());
        assert_eq!(load_settings(None), KvldParameters::default());
    }
}
