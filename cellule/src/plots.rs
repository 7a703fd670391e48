use crate::dataset::{ClusterGraph, MarkerGene};
use fnv::FnvHashMap;
use log::info;
use nalgebra::DMatrix;
use plotly::common::color::Rgb;
use plotly::common::{Line, Marker, Mode};
use plotly::layout::{Axis, AxisType};
use plotly::{BoxPlot, Layout, Plot, Scatter};
use std::collections::BTreeMap;
use std::path::Path;

/// Qualitative palette cycled across clusters.
const PALETTE: [(u8, u8, u8); 10] = [
    (31, 119, 180),
    (255, 127, 14),
    (44, 160, 44),
    (214, 39, 40),
    (148, 103, 189),
    (140, 86, 75),
    (227, 119, 194),
    (127, 127, 127),
    (188, 189, 34),
    (23, 190, 207),
];

fn palette_color(k: usize) -> Rgb {
    let (r, g, b) = PALETTE[k % PALETTE.len()];
    Rgb::new(r, g, b)
}

fn save(mut plot: Plot, layout: Layout, file: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(file).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    plot.set_layout(layout);
    plot.write_html(file);
    info!("wrote {}", file);
    Ok(())
}

/// Scatter of a 2 x n coordinate matrix, one trace per categorical label so
/// the legend lists every group.
fn scatter_by_group(
    coords: &DMatrix<f32>,
    groups: &BTreeMap<String, Vec<usize>>,
    title: &str,
    axis_prefix: &str,
    file: &str,
) -> anyhow::Result<()> {
    let mut plot = Plot::new();
    for (k, (name, cells)) in groups.iter().enumerate() {
        let x: Vec<f64> = cells.iter().map(|&i| coords[(0, i)] as f64).collect();
        let y: Vec<f64> = cells.iter().map(|&i| coords[(1, i)] as f64).collect();
        let trace = Scatter::new(x, y)
            .mode(Mode::Markers)
            .marker(Marker::new().color(palette_color(k)).size(4))
            .name(name.clone());
        plot.add_trace(trace);
    }
    let layout = Layout::new()
        .title(title.to_string())
        .x_axis(Axis::new().title(format!("{}1", axis_prefix)))
        .y_axis(Axis::new().title(format!("{}2", axis_prefix)));
    save(plot, layout, file)
}

pub fn embedding_by_cluster(
    coords: &DMatrix<f32>,
    labels: &[u32],
    title: &str,
    axis_prefix: &str,
    file: &str,
) -> anyhow::Result<()> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (cell, &c) in labels.iter().enumerate() {
        groups.entry(format!("cluster {}", c)).or_default().push(cell);
    }
    scatter_by_group(coords, &groups, title, axis_prefix, file)
}

pub fn embedding_by_gene_name(
    coords: &DMatrix<f32>,
    names: &[Box<str>],
    title: &str,
    axis_prefix: &str,
    file: &str,
) -> anyhow::Result<()> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (cell, name) in names.iter().enumerate() {
        groups.entry(name.to_string()).or_default().push(cell);
    }
    scatter_by_group(coords, &groups, title, axis_prefix, file)
}

/// One box per QC metric, each on its own y scale would be nicer but a
/// shared figure mirrors the usual side-by-side diagnostic.
pub fn qc_distributions(metrics: &[(&str, &[f32])], file: &str) -> anyhow::Result<()> {
    let mut plot = Plot::new();
    for (name, values) in metrics {
        let y: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        plot.add_trace(BoxPlot::new(y).name(name.to_string()));
    }
    let layout = Layout::new().title("QC metric distributions".to_string());
    save(plot, layout, file)
}

/// Counts vs detected genes, coloured by a continuous per-cell value
/// (mitochondrial percentage) on a blue-to-red ramp.
pub fn qc_scatter(
    total_counts: &[f32],
    n_genes: &[u32],
    pct_mt: &[f32],
    file: &str,
) -> anyhow::Result<()> {
    let x: Vec<f64> = total_counts.iter().map(|&v| v as f64).collect();
    let y: Vec<f64> = n_genes.iter().map(|&v| v as f64).collect();

    let hi = pct_mt.iter().cloned().fold(0.0f32, f32::max).max(1e-6);
    let colors: Vec<Rgb> = pct_mt
        .iter()
        .map(|&v| {
            let t = (v / hi).clamp(0.0, 1.0);
            Rgb::new((t * 255.0) as u8, 60, ((1.0 - t) * 255.0) as u8)
        })
        .collect();

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(x, y)
            .mode(Mode::Markers)
            .marker(Marker::new().color_array(colors).size(4))
            .name("cells"),
    );
    let layout = Layout::new()
        .title("Total counts vs detected genes".to_string())
        .x_axis(Axis::new().title("total counts".to_string()))
        .y_axis(Axis::new().title("detected genes".to_string()));
    save(plot, layout, file)
}

/// Log-log mean vs residual variance, selected genes in a separate trace,
/// an optional externally supplied highlight list in a third.
pub fn mean_variance(
    mean: &[f32],
    residual_variance: &[f32],
    highly_variable: &[bool],
    highlighted: &[bool],
    file: &str,
) -> anyhow::Result<()> {
    let mut plot = Plot::new();

    let groups: [(&str, Box<dyn Fn(usize) -> bool + '_>, Rgb); 3] = [
        (
            "other",
            Box::new(|i| !highly_variable[i] && !highlighted[i]),
            Rgb::new(160, 160, 160),
        ),
        (
            "highly variable",
            Box::new(|i| highly_variable[i] && !highlighted[i]),
            Rgb::new(31, 119, 180),
        ),
        ("highlighted", Box::new(|i| highlighted[i]), Rgb::new(214, 39, 40)),
    ];

    for (name, select, color) in groups {
        let idx: Vec<usize> = (0..mean.len()).filter(|&i| select(i)).collect();
        if idx.is_empty() {
            continue;
        }
        let x: Vec<f64> = idx.iter().map(|&i| mean[i].max(1e-12) as f64).collect();
        let y: Vec<f64> = idx
            .iter()
            .map(|&i| residual_variance[i].max(1e-12) as f64)
            .collect();
        plot.add_trace(
            Scatter::new(x, y)
                .mode(Mode::Markers)
                .marker(Marker::new().color(color).size(4))
                .name(name.to_string()),
        );
    }

    let layout = Layout::new()
        .title("Gene mean vs residual variance".to_string())
        .x_axis(Axis::new().title("mean".to_string()).type_(AxisType::Log))
        .y_axis(
            Axis::new()
                .title("residual variance".to_string())
                .type_(AxisType::Log),
        );
    save(plot, layout, file)
}

/// One ranked-marker trace per cluster: z score against rank, gene name on
/// hover text.
pub fn ranked_markers(ranking: &BTreeMap<u32, Vec<MarkerGene>>, file: &str) -> anyhow::Result<()> {
    let mut plot = Plot::new();
    for (k, (label, markers)) in ranking.iter().enumerate() {
        let x: Vec<f64> = (1..=markers.len()).map(|r| r as f64).collect();
        let y: Vec<f64> = markers.iter().map(|m| m.z as f64).collect();
        let text: Vec<String> = markers.iter().map(|m| m.gene.to_string()).collect();
        plot.add_trace(
            Scatter::new(x, y)
                .mode(Mode::Markers)
                .marker(Marker::new().color(palette_color(k)).size(5))
                .text_array(text)
                .name(format!("cluster {}", label)),
        );
    }
    let layout = Layout::new()
        .title("Ranked marker genes".to_string())
        .x_axis(Axis::new().title("rank".to_string()))
        .y_axis(Axis::new().title("z score".to_string()));
    save(plot, layout, file)
}

/// Cluster-level trajectory graph drawn over the 2D embedding: one line per
/// inter-cluster edge (width scaled by connectivity), cluster centroids as
/// labelled markers.
pub fn trajectory_graph(
    coords: &DMatrix<f32>,
    labels: &[u32],
    graph: &ClusterGraph,
    file: &str,
) -> anyhow::Result<()> {
    let mut centroid: FnvHashMap<u32, (f64, f64, usize)> = FnvHashMap::default();
    for (cell, &c) in labels.iter().enumerate() {
        let e = centroid.entry(c).or_insert((0.0, 0.0, 0));
        e.0 += coords[(0, cell)] as f64;
        e.1 += coords[(1, cell)] as f64;
        e.2 += 1;
    }
    let centroid: BTreeMap<u32, (f64, f64)> = centroid
        .into_iter()
        .map(|(c, (x, y, n))| (c, (x / n as f64, y / n as f64)))
        .collect();

    let mut plot = Plot::new();
    for (&(a, b), &w) in graph.edges.iter().zip(graph.weights.iter()) {
        let (Some(&(ax, ay)), Some(&(bx, by))) = (centroid.get(&a), centroid.get(&b)) else {
            continue;
        };
        plot.add_trace(
            Scatter::new(vec![ax, bx], vec![ay, by])
                .mode(Mode::Lines)
                .line(
                    Line::new()
                        .color(Rgb::new(120, 120, 120))
                        .width((1.0 + 5.0 * w as f64).min(6.0)),
                )
                .show_legend(false),
        );
    }
    for (k, (&c, &(x, y))) in centroid.iter().enumerate() {
        plot.add_trace(
            Scatter::new(vec![x], vec![y])
                .mode(Mode::Markers)
                .marker(Marker::new().color(palette_color(k)).size(14))
                .name(format!("cluster {}", c)),
        );
    }
    let layout = Layout::new().title("Cluster trajectory graph".to_string());
    save(plot, layout, file)
}
