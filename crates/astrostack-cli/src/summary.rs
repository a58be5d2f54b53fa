use astrostack_core::manifest::{FileManifest, FrameClass};
use astrostack_core::pipeline::{StackConfig, StackReport};
use astrostack_core::register::Transform;
use astrostack_core::stack::StackedImage;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    warning: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            warning: Style::new().yellow(),
        }
    }
}

pub fn print_run_summary(manifest: &FileManifest, config: &StackConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Astrostack"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    // Frames
    println!("  {}", s.header.apply_to("Frames"));
    for class in FrameClass::ALL {
        let count = manifest.count(class);
        if count == 0 {
            println!("    {:<12}{}", s.label.apply_to(class), s.disabled.apply_to("none"));
        } else {
            println!("    {:<12}{}", s.label.apply_to(class), s.value.apply_to(count));
        }
    }
    println!();

    // Registration
    println!("  {}", s.header.apply_to("Registration"));
    println!("    {:<12}{}", s.label.apply_to("Detector"), s.method.apply_to(config.detector));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Keep"),
        s.value.apply_to(format!("{:.0}%", config.match_fraction * 100.0))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("RANSAC"),
        s.value.apply_to(format!("{} px", config.ransac.threshold))
    );
    println!();

    // Output
    println!("  {:<14}{}", s.label.apply_to("Combine"), s.method.apply_to(config.combine));
    match config.save_path() {
        Some(path) => println!("  {:<14}{}", s.label.apply_to("Output"), s.path.apply_to(path.display())),
        None => println!("  {:<14}{}", s.label.apply_to("Output"), s.disabled.apply_to("not saved")),
    }
    println!();
}

pub fn print_image_summary(image: &StackedImage, label: &str) {
    let s = Styles::new();
    let (min, max) = image.range();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!("    {:<12}{}", s.label.apply_to("Stack"), s.value.apply_to(label));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Size"),
        s.value.apply_to(format!("{}x{}x{}", image.width(), image.height(), image.channels()))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Range"),
        s.value.apply_to(format!("{min:.0} .. {max:.0}"))
    );
}

pub fn print_stack_report(report: &StackReport) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Masters"));
    for master in &report.masters {
        let status = match &master.failure {
            Some(reason) => s.warning.apply_to(format!("dropped: {reason}")),
            None if master.combined == 0 => s.disabled.apply_to("none".to_string()),
            None => s.value.apply_to(format!("{}/{} frames", master.combined, master.requested)),
        };
        println!("    {:<12}{}", s.label.apply_to(master.class), status);
    }
    println!();

    println!("  {}", s.header.apply_to("Lights"));
    println!("    {:<12}{}", s.label.apply_to("Reference"), s.path.apply_to(report.reference.display()));
    let fallback = report
        .registrations
        .iter()
        .filter(|r| matches!(r.transform, Transform::Translation { .. }))
        .count();
    println!("    {:<12}{}", s.label.apply_to("Stacked"), s.value.apply_to(report.stacked_count()));
    if fallback > 0 {
        println!("    {:<12}{}", s.label.apply_to("Shifted"), s.warning.apply_to(fallback));
    }
    if report.skipped.is_empty() {
        println!("    {:<12}{}", s.label.apply_to("Skipped"), s.disabled.apply_to("none"));
    } else {
        println!("    {:<12}{}", s.label.apply_to("Skipped"), s.warning.apply_to(report.skipped_count()));
        for frame in &report.skipped {
            println!("      {} {}", s.path.apply_to(frame.path.display()), s.label.apply_to(&frame.reason));
        }
    }
    println!();
}
