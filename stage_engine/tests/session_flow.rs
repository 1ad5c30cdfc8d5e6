use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use stage_engine::lua_host::{PersistenceError, Vec2};
use stage_engine::{Collaborators, EngineConfig, Session};
use tempfile::tempdir;

const DT: f32 = 1.0 / 60.0;

fn demo_session() -> Result<Session> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root should exist")
        .join("demos/cabin/game.json");
    let config = EngineConfig::from_json_file(&config_path)?;
    let collaborators = Collaborators::from_config(&config)?;
    let mut session = Session::new(config, collaborators)?;
    session.boot()?;
    Ok(session)
}

fn run_frames(session: &mut Session, frames: usize) -> Result<usize> {
    let mut fired = 0;
    for _ in 0..frames {
        fired += session.step(DT)?.callbacks_fired;
    }
    Ok(fired)
}

#[test]
fn boot_spawns_the_start_scene() -> Result<()> {
    let session = demo_session()?;
    assert_eq!(session.current_scene().as_deref(), Some("cabin"));
    let mut live = session.live_ids();
    live.sort();
    assert_eq!(
        live,
        vec!["cabin_background", "door", "key1", "lamp", "note", "player"]
    );
    let lamp = session.object("lamp").expect("lamp should be live");
    assert_eq!(lamp.layer, 2);
    assert_eq!(lamp.scale, 0.5);
    assert_eq!(session.lua_path("door")?.as_deref(), Some("scenes.cabin.items.door"));
    assert_eq!(session.lua_path("player")?.as_deref(), Some("player"));
    Ok(())
}

#[test]
fn taking_the_key_moves_it_into_the_inventory() -> Result<()> {
    let mut session = demo_session()?;
    session.run_action("take_key", "key1")?;
    assert!(run_frames(&mut session, 60)? >= 1);

    let key = session.object("key1").expect("key should stay live");
    assert!(key.cross_scene);
    assert_eq!(key.skin.as_deref(), Some("inventory"));
    assert_eq!(session.lua_path("key1")?.as_deref(), Some("inventory_items.key1"));
    let in_scene: bool = session
        .lua()
        .load("return scenes.cabin.items.key1 ~= nil")
        .eval()?;
    assert!(!in_scene);
    assert_eq!(session.audio_history(), vec!["audio/pickup.ogg".to_string()]);

    let player = session.object("player").expect("player should be live");
    assert_eq!(player.position, Vec2::new(220.0, 320.0));
    Ok(())
}

#[test]
fn walking_to_a_missing_point_does_nothing() -> Result<()> {
    let mut session = demo_session()?;
    session.exec("GoToPointOn('lamp', 'base', function() reached = true end)")?;
    run_frames(&mut session, 30)?;
    // the background has a window point, but only the lamp's own points count
    session.exec("GoToPointOn('lamp', 'window', function() reached = true end)")?;
    run_frames(&mut session, 30)?;
    let player = session.object("player").expect("player should be live");
    assert_eq!(player.position, Vec2::new(100.0, 300.0));
    assert_eq!(session.pending_callbacks(), 0);
    let reached: Option<bool> = session.lua().globals().get("reached")?;
    assert!(reached.is_none());
    Ok(())
}

#[test]
fn deleted_objects_never_fire_their_callbacks() -> Result<()> {
    let mut session = demo_session()?;
    session.exec(
        "opened = 0
         AddAnimationOn('door', 0, 'open', false, 0, function() opened = opened + 1 end)",
    )?;
    run_frames(&mut session, 120)?;
    let opened: i64 = session.lua().globals().get("opened")?;
    assert_eq!(opened, 1);

    session.exec(
        "AddAnimationOn('door', 0, 'open', false, 0, function() opened = opened + 1 end)
         SetDeletedOn('door')",
    )?;
    assert_eq!(session.pending_callbacks(), 1);
    run_frames(&mut session, 120)?;
    let opened: i64 = session.lua().globals().get("opened")?;
    assert_eq!(opened, 1);
    assert_eq!(session.pending_callbacks(), 0);
    assert!(session.object("door").is_none());
    assert_eq!(session.lua_path("door")?, None);
    assert!(session.events().iter().any(|event| event.starts_with("callback.drop door")));
    Ok(())
}

#[test]
fn live_count_moves_by_net_additions() -> Result<()> {
    let mut session = demo_session()?;
    let before = session.live_ids().len();
    session.exec(
        "CreateObject('mushroom', 'm1')
         CreateObject('mushroom', 'm2')
         CreateObject('mushroom', 'm3')
         SetDeletedOn('m2')
         SetDeletedOn('lamp')",
    )?;
    assert_eq!(session.live_ids().len(), before);
    let report = session.step(DT)?;
    assert_eq!(session.live_ids().len(), before + 3 - 2);
    assert!(report.added.contains(&"m1".to_string()));
    assert!(session.events().contains(&"object.add m1".to_string()));
    assert!(!session.live_ids().contains(&"m2".to_string()));
    assert!(report.removed.contains(&"lamp".to_string()));
    Ok(())
}

#[test]
fn implicit_operations_outside_callbacks_fail() -> Result<()> {
    let session = demo_session()?;
    let err = session.exec("SetHidden()").unwrap_err();
    assert!(format!("{err:#}").contains("SetHidden: no current object"), "{err:#}");
    Ok(())
}

#[test]
fn hidden_objects_are_not_interactable() -> Result<()> {
    let mut session = demo_session()?;
    session.exec("SetHiddenOn('lamp')")?;
    assert!(!session.interact("lamp", "toggle_lamp")?);
    assert!(session.interact("door", "open_door")?);
    assert!(session.events().iter().any(|event| event == "dialog.play door_locked"));
    Ok(())
}

#[test]
fn opening_the_door_with_the_key_changes_scene() -> Result<()> {
    let mut session = demo_session()?;
    session.run_action("take_key", "key1")?;
    run_frames(&mut session, 60)?;
    session.run_action("open_door", "door")?;
    run_frames(&mut session, 120)?;

    assert_eq!(session.current_scene().as_deref(), Some("forest"));
    let mut live = session.live_ids();
    live.sort();
    assert_eq!(live, vec!["forest_background", "key1", "mushroom", "player"]);
    let scene: String = session.lua().load("return game.scene").eval()?;
    assert_eq!(scene, "forest");
    Ok(())
}

#[test]
fn save_and_load_reproduce_the_same_file() -> Result<()> {
    let dir = tempdir()?;
    let first = dir.path().join("first.sav");
    let second = dir.path().join("second.sav");

    let mut session = demo_session()?;
    session.run_action("take_key", "key1")?;
    run_frames(&mut session, 60)?;
    session.save_to(&first)?;

    let mut restored = demo_session()?;
    restored.load_from(&first)?;
    restored.save_to(&second)?;
    assert_eq!(fs::read_to_string(&first)?, fs::read_to_string(&second)?);

    let key = restored.object("key1").expect("key should be restored");
    assert!(key.cross_scene);
    assert_eq!(restored.lua_path("key1")?.as_deref(), Some("inventory_items.key1"));
    let player = restored.object("player").expect("player should be restored");
    assert_eq!(player.position, Vec2::new(220.0, 320.0));
    Ok(())
}

#[test]
fn malformed_saves_leave_the_game_untouched() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("broken.sav");
    fs::write(&path, "game = {}\ngame.scene = \"forest\"\ngame.scene = = 3\n")?;

    let mut session = demo_session()?;
    let err = session.load_from(&path).unwrap_err();
    let persistence = err
        .downcast_ref::<PersistenceError>()
        .expect("load should fail with a persistence error");
    assert_eq!(persistence.line(), Some(3));

    assert_eq!(session.current_scene().as_deref(), Some("cabin"));
    let scene: String = session.lua().load("return game.scene").eval()?;
    assert_eq!(scene, "cabin");
    assert!(session.object("door").is_some());
    Ok(())
}

#[test]
fn saves_naming_an_unknown_scene_leave_the_game_untouched() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("lost.sav");
    fs::write(&path, "game = {}\ngame.scene = \"nowhere\"\nscenes = {}\n")?;

    let mut session = demo_session()?;
    let live_before = session.live_ids();
    let err = session.load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("nowhere"), "{err:#}");

    assert_eq!(session.current_scene().as_deref(), Some("cabin"));
    let (scene, door): (String, bool) = session
        .lua()
        .load("return game.scene, scenes.cabin.items.door ~= nil")
        .eval()?;
    assert_eq!(scene, "cabin");
    assert!(door);
    assert!(session.object("door").is_some());
    assert_eq!(session.live_ids(), live_before);
    Ok(())
}

#[test]
fn script_saves_land_in_the_save_directory() -> Result<()> {
    let session = demo_session()?;
    let path = session.save_path("slot1")?;
    assert!(path.ends_with("saves/slot1.lua"), "{}", path.display());
    assert!(session.save_path("../escape").is_err());
    Ok(())
}
