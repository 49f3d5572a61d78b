mod common;

use common::assert_markups_match;
use pagemark_core::{BackendKind, Bounds, Color, Markup, Point};
use pagemark_render::{create_backend, SurfaceInfo};

const BACKENDS: [BackendKind; 2] = [BackendKind::Overlay, BackendKind::Canvas];

fn one_of_each(page: usize) -> Vec<Markup> {
    vec![
        Markup::highlight(page, Bounds::new(0.1, 0.2, 0.3, 0.05), Color::HIGHLIGHT),
        Markup::ink(
            page,
            vec![
                Point::new(0.1, 0.1),
                Point::new(0.15, 0.2),
                Point::new(0.3, 0.25),
                Point::new(0.5, 0.2),
            ],
            3.0,
            Color::rgb(0x33, 0x66, 0x99),
        ),
        Markup::text(
            page,
            Bounds::new(0.5, 0.5, 0.2, 0.04),
            "Check <this> & that".into(),
            14.0,
            Color::BLACK,
        ),
        Markup::comment(page, Bounds::new(0.8, 0.1, 0.04, 0.03), "Reviewer note".into()),
    ]
}

fn surface(scale: f64) -> SurfaceInfo {
    SurfaceInfo {
        page: 2,
        width: 612.0 * scale,
        height: 792.0 * scale,
        scale,
    }
}

#[test]
fn every_backend_round_trips_every_variant() {
    let markups = one_of_each(2);
    for kind in BACKENDS {
        for scale in [0.5, 1.0, 1.75, 3.0] {
            let mut backend = create_backend(kind);
            backend.attach(surface(scale));
            backend.render_from_model(&markups);
            let serialized = backend.serialize_to_model(&markups);
            assert_markups_match(&serialized, &markups);
        }
    }
}

#[test]
fn switching_backends_preserves_markups() {
    let markups = one_of_each(2);

    let mut canvas = create_backend(BackendKind::Canvas);
    canvas.attach(surface(1.25));
    canvas.render_from_model(&markups);
    let from_canvas = canvas.serialize_to_model(&markups);
    canvas.dispose();

    let mut overlay = create_backend(BackendKind::Overlay);
    overlay.attach(surface(2.0));
    overlay.render_from_model(&from_canvas);
    let from_overlay = overlay.serialize_to_model(&from_canvas);

    assert_markups_match(&from_overlay, &markups);
}

#[test]
fn backends_ignore_other_pages_when_serializing() {
    let mut markups = one_of_each(2);
    markups.push(Markup::comment(5, Bounds::new(0.1, 0.1, 0.05, 0.05), "elsewhere".into()));
    for kind in BACKENDS {
        let mut backend = create_backend(kind);
        backend.attach(surface(1.0));
        backend.render_from_model(&one_of_each(2));
        let serialized = backend.serialize_to_model(&markups);
        assert!(serialized.iter().all(|m| m.page == 2), "{kind:?} leaked a page");
        assert_eq!(serialized.len(), 4);
    }
}
